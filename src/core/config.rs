//! Configuration system: TOML file + `NBR_*` env var overrides + defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{NbrError, Result};
use crate::core::paths;
use crate::inventory::builder::{BuildConfig, DEFAULT_CONCURRENCY, DEFAULT_MAX_DEPTH};
use crate::inventory::ignore::{DEFAULT_IGNORE_PATTERNS, IgnoreRules, validate_glob_pattern};
use crate::reconcile::engine::{DateMismatchPolicy, ReconcileOptions, normalize_prefix};

const MAX_CONCURRENCY: usize = 1024;

/// Full reconciler configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub inventory: InventoryConfig,
    pub reconcile: ReconcileConfig,
    pub output: OutputConfig,
    pub paths: PathsConfig,
}

/// Inventory builder knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InventoryConfig {
    /// Admission gate capacity (worker threads).
    pub concurrency: usize,
    pub follow_symlinks: bool,
    pub ignore_patterns: Vec<String>,
    /// Refuse new work after this many seconds; 0 disables the deadline.
    pub deadline_secs: u64,
    pub max_depth: usize,
}

/// Comparison knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Joined in front of source keys before lookup; empty for none.
    pub prefix: String,
    pub date_mismatch: DateMismatchPolicy,
    pub mtime_tolerance_secs: u64,
}

/// Artifact file names, relative to the working directory unless absolute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutputConfig {
    pub local_snapshot: PathBuf,
    pub remote_snapshot: PathBuf,
    pub diff: PathBuf,
    pub summary: PathBuf,
    pub flat: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub activity_log: PathBuf,
    pub activity_log_enabled: bool,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            follow_symlinks: false,
            ignore_patterns: DEFAULT_IGNORE_PATTERNS
                .iter()
                .map(ToString::to_string)
                .collect(),
            deadline_secs: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            date_mismatch: DateMismatchPolicy::StatsOnly,
            mtime_tolerance_secs: 0,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            local_snapshot: PathBuf::from("file_details.json"),
            remote_snapshot: PathBuf::from("blob_details.json"),
            diff: PathBuf::from("diff.json"),
            summary: PathBuf::from("diff_meta.json"),
            flat: PathBuf::from("diff_flat"),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_file: paths::default_config_file(),
            activity_log: paths::default_activity_log(),
            activity_log_enabled: true,
        }
    }
}

impl Config {
    #[must_use]
    pub fn default_path() -> PathBuf {
        paths::default_config_file()
    }

    /// Load config from the default or an explicit path, then apply env
    /// overrides, normalize and validate.
    ///
    /// A missing file at the default path yields defaults; a missing explicit
    /// path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| NbrError::io(&path_buf, source))?;
            toml::from_str::<Self>(&raw)?
        } else if path.is_some() {
            return Err(NbrError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic FNV-1a hash of the effective config, recorded in the activity log.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Pretty TOML for `config show`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| NbrError::Serialization {
            context: "toml",
            details: err.to_string(),
        })
    }

    pub fn build_config(&self) -> BuildConfig {
        BuildConfig {
            concurrency: self.inventory.concurrency,
            deadline: (self.inventory.deadline_secs > 0)
                .then(|| Duration::from_secs(self.inventory.deadline_secs)),
            max_depth: self.inventory.max_depth,
        }
    }

    pub fn ignore_rules(&self) -> Result<IgnoreRules> {
        IgnoreRules::new(&self.inventory.ignore_patterns)
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            prefix: normalize_prefix(&self.reconcile.prefix),
            date_policy: self.reconcile.date_mismatch,
            mtime_tolerance_secs: self.reconcile.mtime_tolerance_secs,
        }
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // inventory
        if let Some(raw) = lookup("NBR_INVENTORY_CONCURRENCY") {
            self.inventory.concurrency = parse_env("NBR_INVENTORY_CONCURRENCY", &raw)?;
        }
        if let Some(raw) = lookup("NBR_INVENTORY_FOLLOW_SYMLINKS") {
            self.inventory.follow_symlinks = parse_env("NBR_INVENTORY_FOLLOW_SYMLINKS", &raw)?;
        }
        if let Some(raw) = lookup("NBR_INVENTORY_DEADLINE_SECS") {
            self.inventory.deadline_secs = parse_env("NBR_INVENTORY_DEADLINE_SECS", &raw)?;
        }
        if let Some(raw) = lookup("NBR_INVENTORY_MAX_DEPTH") {
            self.inventory.max_depth = parse_env("NBR_INVENTORY_MAX_DEPTH", &raw)?;
        }
        if let Some(raw) = lookup("NBR_INVENTORY_IGNORE_PATTERNS") {
            self.inventory.ignore_patterns = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(ToString::to_string)
                .collect();
        }

        // reconcile
        if let Some(raw) = lookup("NBR_RECONCILE_PREFIX") {
            self.reconcile.prefix = raw;
        }
        if let Some(raw) = lookup("NBR_RECONCILE_DATE_MISMATCH") {
            self.reconcile.date_mismatch = raw.parse()?;
        }
        if let Some(raw) = lookup("NBR_RECONCILE_MTIME_TOLERANCE_SECS") {
            self.reconcile.mtime_tolerance_secs =
                parse_env("NBR_RECONCILE_MTIME_TOLERANCE_SECS", &raw)?;
        }

        // paths
        if let Some(raw) = lookup("NBR_ACTIVITY_LOG") {
            self.paths.activity_log = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("NBR_ACTIVITY_LOG_ENABLED") {
            self.paths.activity_log_enabled = parse_env("NBR_ACTIVITY_LOG_ENABLED", &raw)?;
        }

        Ok(())
    }

    fn normalize(&mut self) {
        self.reconcile.prefix = normalize_prefix(&self.reconcile.prefix).unwrap_or_default();
        self.inventory.ignore_patterns.dedup();
    }

    fn validate(&self) -> Result<()> {
        if !(1..=MAX_CONCURRENCY).contains(&self.inventory.concurrency) {
            return Err(NbrError::InvalidConfig {
                details: format!(
                    "inventory.concurrency must be in [1, {MAX_CONCURRENCY}], got {}",
                    self.inventory.concurrency
                ),
            });
        }
        if self.inventory.max_depth == 0 {
            return Err(NbrError::InvalidConfig {
                details: "inventory.max_depth must be at least 1".to_string(),
            });
        }
        for pattern in &self.inventory.ignore_patterns {
            validate_glob_pattern(pattern)?;
        }

        // A tolerance beyond a year hides every real date mismatch.
        if self.reconcile.mtime_tolerance_secs > 365 * 24 * 60 * 60 {
            return Err(NbrError::InvalidConfig {
                details: format!(
                    "reconcile.mtime_tolerance_secs must be at most one year, got {}",
                    self.reconcile.mtime_tolerance_secs
                ),
            });
        }
        if self.reconcile.prefix.contains('\\') {
            return Err(NbrError::InvalidConfig {
                details: "reconcile.prefix must use '/' separators".to_string(),
            });
        }

        for (name, path) in [
            ("local_snapshot", &self.output.local_snapshot),
            ("remote_snapshot", &self.output.remote_snapshot),
            ("diff", &self.output.diff),
            ("summary", &self.output.summary),
            ("flat", &self.output.flat),
        ] {
            if path.as_os_str().is_empty() {
                return Err(NbrError::InvalidConfig {
                    details: format!("output.{name} must not be empty"),
                });
            }
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| NbrError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
