#![forbid(unsafe_code)]

//! NAS Blob Reconciler (nbr): builds attribute snapshots of two hierarchical
//! namespaces (a local file share and an object-store container), reconciles
//! them, and stages the files that still need uploading.
//!
//! Pipeline:
//! 1. **Inventory** — a bounded worker pool crawls a [`NamespaceProvider`]
//!    into an [`AttributeSnapshot`] of `key -> {size, last_modified}`
//! 2. **Reconcile** — keys missing or different on the compare side form the
//!    diff, with a summary of counts and byte totals
//! 3. **Materialize** — the flattened diff drives a copy into a staging tree
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use nas_blob_reconciler::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use nas_blob_reconciler::inventory::builder::{BuildConfig, InventoryBuilder};
//! use nas_blob_reconciler::reconcile::engine::Reconciler;
//! ```
//!
//! [`NamespaceProvider`]: inventory::provider::NamespaceProvider
//! [`AttributeSnapshot`]: inventory::snapshot::AttributeSnapshot

pub mod prelude;

pub mod core;
pub mod inventory;
pub mod logger;
pub mod materialize;
pub mod reconcile;
