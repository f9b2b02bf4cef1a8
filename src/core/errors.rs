//! NBR-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, NbrError>;

/// Top-level error type for the reconciler.
#[derive(Debug, Error)]
pub enum NbrError {
    #[error("[NBR-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[NBR-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[NBR-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[NBR-2001] invalid inventory root {root}: {details}")]
    InvalidRoot { root: String, details: String },

    #[error("[NBR-2002] provider failure at node {node:?}: {details}")]
    Provider { node: String, details: String },

    #[error("[NBR-2101] malformed snapshot {path}: {details}")]
    SnapshotParse { path: PathBuf, details: String },

    #[error("[NBR-2102] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[NBR-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[NBR-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl NbrError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "NBR-1001",
            Self::MissingConfig { .. } => "NBR-1002",
            Self::ConfigParse { .. } => "NBR-1003",
            Self::InvalidRoot { .. } => "NBR-2001",
            Self::Provider { .. } => "NBR-2002",
            Self::SnapshotParse { .. } => "NBR-2101",
            Self::Serialization { .. } => "NBR-2102",
            Self::Io { .. } => "NBR-3002",
            Self::Runtime { .. } => "NBR-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Provider { .. } | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for provider errors at a node.
    #[must_use]
    pub fn provider(node: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Provider {
            node: node.into(),
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for NbrError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for NbrError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
