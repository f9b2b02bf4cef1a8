//! Persisted reconcile artifacts: the difference set, the summary record,
//! and the flat key list consumed by the materializer.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::core::errors::{NbrError, Result};
use crate::inventory::snapshot::{AttributeSnapshot, write_atomically};
use crate::reconcile::engine::{DiffOutcome, DiffSummary};

impl DiffSummary {
    pub fn to_json_pretty(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomically(path, self.to_json_pretty()?.as_bytes())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| NbrError::io(path, source))?;
        serde_json::from_str(&raw).map_err(|err| NbrError::SnapshotParse {
            path: path.to_path_buf(),
            details: err.to_string(),
        })
    }
}

impl DiffOutcome {
    /// Write the difference set and the summary. Either failure is fatal and
    /// names the file.
    pub fn save(&self, diff_path: &Path, summary_path: &Path) -> Result<()> {
        self.diff.save(diff_path)?;
        self.summary.save(summary_path)
    }
}

/// One lower-cased key per line, sorted and de-duplicated, newline-terminated.
pub fn flatten_keys(diff: &AttributeSnapshot) -> String {
    let keys: BTreeSet<String> = diff.keys().map(|key| key.to_lowercase()).collect();
    let mut out = String::with_capacity(keys.iter().map(|k| k.len() + 1).sum());
    for key in keys {
        out.push_str(&key);
        out.push('\n');
    }
    out
}

/// Write the flat key list for `diff` to `path`; returns the number of keys.
pub fn write_flat(diff: &AttributeSnapshot, path: &Path) -> Result<usize> {
    let body = flatten_keys(diff);
    write_atomically(path, body.as_bytes())?;
    Ok(body.lines().count())
}

/// Read a flat key list, skipping blank lines and tolerating CRLF endings.
pub fn read_flat(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path).map_err(|source| NbrError::io(path, source))?;
    Ok(raw
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect())
}
