//! Materializer: copies the entries named by a flat diff list to a destination root.

pub mod copy;
