//! Attribute snapshots: the key → {size, last_modified} map produced by one
//! inventory build and consumed by the reconciler.
//!
//! A snapshot is built once and then treated as read-only. While a build is
//! running, the only mutable handle is [`SharedSnapshot`], which owns the map
//! behind a single lock and exposes nothing but `insert` and `finish`, so the
//! merge critical section is exactly one map insertion.
//!
//! Persistence is canonical JSON: a key-sorted object whose values carry a
//! `size` field and an optional RFC 3339 `last_modified` field.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::core::errors::{NbrError, Result};

/// Size and optional modification time for one object key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub size: u64,
    /// Absent when the backend does not report it cheaply. Zero-valued
    /// timestamps (`0001-01-01T00:00:00Z`) written by older tooling read as absent.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_timestamp"
    )]
    pub last_modified: Option<DateTime<Utc>>,
}

impl AttributeRecord {
    #[must_use]
    pub const fn new(size: u64, last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            size,
            last_modified,
        }
    }

    /// Record without a timestamp (size-only comparison).
    #[must_use]
    pub const fn sized(size: u64) -> Self {
        Self {
            size,
            last_modified: None,
        }
    }
}

pub(crate) fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(raw.filter(|ts| ts.year() > 1))
}

/// Complete key → attributes mapping for one side of a comparison.
///
/// Backed by a `BTreeMap` so iteration and serialization are always in
/// lexicographic key order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeSnapshot {
    entries: BTreeMap<String, AttributeRecord>,
}

impl AttributeSnapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&AttributeRecord> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert a record; the previous record for the same key is replaced and returned.
    pub fn insert(&mut self, key: impl Into<String>, record: AttributeRecord) -> Option<AttributeRecord> {
        self.entries.insert(key.into(), record)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, AttributeRecord> {
        self.entries.iter()
    }

    pub fn keys(&self) -> btree_map::Keys<'_, String, AttributeRecord> {
        self.entries.keys()
    }

    /// Sum of all record sizes.
    pub fn total_bytes(&self) -> u64 {
        self.entries
            .values()
            .fold(0u64, |acc, rec| acc.saturating_add(rec.size))
    }

    /// Lower-case every key. When two keys fold to the same form the record
    /// visited last in key order wins; the number of such collisions is returned.
    #[must_use]
    pub fn normalize_case(&self) -> (Self, usize) {
        let mut folded = BTreeMap::new();
        let mut collisions = 0usize;
        for (key, record) in &self.entries {
            if folded.insert(key.to_lowercase(), *record).is_some() {
                collisions += 1;
            }
        }
        (Self { entries: folded }, collisions)
    }

    /// Pretty JSON with sorted keys and a trailing newline.
    pub fn to_json_pretty(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    /// Parse a snapshot; `origin` names the source in the error.
    pub fn from_json_str(raw: &str, origin: &Path) -> Result<Self> {
        serde_json::from_str(raw).map_err(|err| NbrError::SnapshotParse {
            path: origin.to_path_buf(),
            details: err.to_string(),
        })
    }

    /// Load a persisted snapshot. Unreadable or malformed input is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| NbrError::io(path, source))?;
        Self::from_json_str(&raw, path)
    }

    /// Persist the snapshot, replacing `path` atomically via a sibling temp file.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomically(path, self.to_json_pretty()?.as_bytes())
    }
}

impl FromIterator<(String, AttributeRecord)> for AttributeSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, AttributeRecord)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a AttributeSnapshot {
    type Item = (&'a String, &'a AttributeRecord);
    type IntoIter = btree_map::Iter<'a, String, AttributeRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl IntoIterator for AttributeSnapshot {
    type Item = (String, AttributeRecord);
    type IntoIter = btree_map::IntoIter<String, AttributeRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Write `bytes` to `path` through `<path>.tmp` + rename, creating parent dirs.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| NbrError::io(parent, source))?;
    }
    let tmp = temp_sibling(path);
    let mut file = fs::File::create(&tmp).map_err(|source| NbrError::io(&tmp, source))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_data())
        .map_err(|source| NbrError::io(&tmp, source))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|source| NbrError::io(path, source))
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Build-time owner of a snapshot under construction.
///
/// Workers hold `&SharedSnapshot` and may only insert. Ownership of the
/// finished map moves out through [`SharedSnapshot::finish`], which consumes
/// the owner and therefore cannot race with any insert.
#[derive(Debug, Default)]
pub struct SharedSnapshot {
    entries: Mutex<BTreeMap<String, AttributeRecord>>,
}

impl SharedSnapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one record. Returns `true` when an existing key was overwritten.
    pub fn insert(&self, key: String, record: AttributeRecord) -> bool {
        self.entries.lock().insert(key, record).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    #[must_use]
    pub fn finish(self) -> AttributeSnapshot {
        AttributeSnapshot {
            entries: self.entries.into_inner(),
        }
    }
}
