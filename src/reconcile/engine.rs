//! Reconciliation engine: compares a source snapshot against a compare
//! snapshot and produces the difference set plus summary counters.
//!
//! Both sides are lower-cased first. For each source entry the lookup key is
//! the optional prefix joined with the source key. Classification, in order:
//!
//! 1. absent on the compare side → missing (emitted)
//! 2. sizes differ → size mismatch (emitted)
//! 3. both timestamps present and further apart than the tolerance → date
//!    mismatch (counted; emitted only under [`DateMismatchPolicy::IncludeInDiff`])
//! 4. otherwise a match
//!
//! Emitted entries always carry the source record.

#![allow(missing_docs)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::NbrError;
use crate::inventory::snapshot::{AttributeRecord, AttributeSnapshot};

const BYTES_PER_GIB: u64 = 1024 * 1024 * 1024;

/// Whether date-only mismatches are written to the difference set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DateMismatchPolicy {
    /// Count date mismatches in the summary but do not emit them.
    #[default]
    #[serde(rename = "stats_only")]
    StatsOnly,
    /// Emit date mismatches alongside missing and size-mismatched entries.
    #[serde(rename = "include")]
    IncludeInDiff,
}

impl DateMismatchPolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StatsOnly => "stats_only",
            Self::IncludeInDiff => "include",
        }
    }
}

impl fmt::Display for DateMismatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DateMismatchPolicy {
    type Err = NbrError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stats_only" | "stats-only" | "stats" => Ok(Self::StatsOnly),
            "include" | "include_in_diff" | "include-in-diff" => Ok(Self::IncludeInDiff),
            other => Err(NbrError::InvalidConfig {
                details: format!(
                    "date_mismatch must be \"stats_only\" or \"include\", got {other:?}"
                ),
            }),
        }
    }
}

/// Per-entry classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryClass {
    Missing,
    SizeMismatch,
    DateMismatch,
    Match,
}

/// Classify one source record against its counterpart (if any).
pub fn classify(
    source: &AttributeRecord,
    compare: Option<&AttributeRecord>,
    tolerance_secs: u64,
) -> EntryClass {
    let Some(compare) = compare else {
        return EntryClass::Missing;
    };
    if source.size != compare.size {
        return EntryClass::SizeMismatch;
    }
    match (source.last_modified, compare.last_modified) {
        // Whole seconds: object listings rarely carry sub-second precision.
        (Some(a), Some(b)) => {
            if a.timestamp().abs_diff(b.timestamp()) > tolerance_secs {
                EntryClass::DateMismatch
            } else {
                EntryClass::Match
            }
        }
        _ => EntryClass::Match,
    }
}

/// Normalize a key prefix into clean `/`-joined segments, lower-cased.
///
/// Empty and `.` segments are dropped and `..` removes the previous segment,
/// so `Archive//2020/./` and `archive/2020` name the same prefix. An empty
/// result means no prefix.
pub fn normalize_prefix(raw: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.trim().split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/").to_lowercase())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Joined in front of each source key before lookup (already normalized).
    pub prefix: Option<String>,
    pub date_policy: DateMismatchPolicy,
    /// Timestamps closer than this many seconds count as equal.
    pub mtime_tolerance_secs: u64,
}

impl ReconcileOptions {
    #[must_use]
    pub fn with_prefix(mut self, raw: &str) -> Self {
        self.prefix = normalize_prefix(raw);
        self
    }
}

/// Flat record of named counters, persisted as the diff summary file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub total_source_count: u64,
    pub total_compare_count: u64,
    pub missing_keys_count: u64,
    pub different_files_count: u64,
    pub size_mismatch_count: u64,
    pub modified_date_mismatch: u64,
    pub total_diff_bytes: u64,
    /// `total_diff_bytes` in whole GiB, truncated.
    pub total_diff_size: u64,
    pub case_collisions: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffOutcome {
    pub diff: AttributeSnapshot,
    pub summary: DiffSummary,
}

/// Pure, single-threaded comparison of two snapshots.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(options: ReconcileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    pub fn reconcile(&self, source: &AttributeSnapshot, compare: &AttributeSnapshot) -> DiffOutcome {
        let (source, source_collisions) = source.normalize_case();
        let (compare, compare_collisions) = compare.normalize_case();

        let mut summary = DiffSummary {
            total_source_count: source.len() as u64,
            total_compare_count: compare.len() as u64,
            case_collisions: (source_collisions + compare_collisions) as u64,
            ..DiffSummary::default()
        };
        let mut diff = AttributeSnapshot::new();

        for (key, record) in &source {
            let class = match &self.options.prefix {
                Some(prefix) => classify(
                    record,
                    compare.get(&format!("{prefix}/{key}")),
                    self.options.mtime_tolerance_secs,
                ),
                None => classify(record, compare.get(key), self.options.mtime_tolerance_secs),
            };

            let emit = match class {
                EntryClass::Missing => {
                    summary.missing_keys_count += 1;
                    true
                }
                EntryClass::SizeMismatch => {
                    summary.size_mismatch_count += 1;
                    summary.different_files_count += 1;
                    true
                }
                EntryClass::DateMismatch => {
                    summary.modified_date_mismatch += 1;
                    let include = self.options.date_policy == DateMismatchPolicy::IncludeInDiff;
                    if include {
                        summary.different_files_count += 1;
                    }
                    include
                }
                EntryClass::Match => false,
            };

            if emit {
                summary.total_diff_bytes = summary.total_diff_bytes.saturating_add(record.size);
                diff.insert(key.clone(), *record);
            }
        }

        summary.total_diff_size = summary.total_diff_bytes / BYTES_PER_GIB;
        DiffOutcome { diff, summary }
    }
}
