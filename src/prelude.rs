//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use nas_blob_reconciler::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{NbrError, Result};

// Inventory
pub use crate::inventory::builder::{BuildConfig, BuildReport, BuildSummary, InventoryBuilder};
pub use crate::inventory::ignore::{IgnorePredicate, IgnoreRules};
pub use crate::inventory::listing::ListingProvider;
pub use crate::inventory::local::LocalFsProvider;
pub use crate::inventory::progress::Progress;
pub use crate::inventory::provider::{Child, NamespaceProvider};
pub use crate::inventory::snapshot::{AttributeRecord, AttributeSnapshot};

// Reconcile
pub use crate::reconcile::engine::{
    DateMismatchPolicy, DiffOutcome, DiffSummary, ReconcileOptions, Reconciler,
};

// Materialize
pub use crate::materialize::copy::{CopyOptions, CopyReport, Materializer};

// Logging
pub use crate::logger::activity::{ActivityEvent, ActivityLog};
