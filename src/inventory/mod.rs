//! Inventory: snapshots, ignore rules, namespace providers, and the parallel builder.

pub mod builder;
pub mod ignore;
pub mod listing;
pub mod local;
pub mod progress;
pub mod provider;
pub mod snapshot;
