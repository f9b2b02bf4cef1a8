//! Object-store provider backed by a flat listing export.
//!
//! The export is either JSON Lines or a single JSON array of objects shaped
//! like `{"name": "...", "size": 123, "last_modified": "..."}` (`key` is
//! accepted for `name`). Names are flat; the provider rebuilds the prefix
//! tree using `/` as the delimiter so the builder can crawl it like a
//! directory tree.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::core::errors::{NbrError, Result};
use crate::inventory::provider::{Child, NamespaceProvider, join_key};
use crate::inventory::snapshot::{AttributeRecord, deserialize_timestamp};

/// One object as it appears in the export.
#[derive(Debug, Clone, Deserialize)]
pub struct ListingEntry {
    #[serde(alias = "key")]
    pub name: String,
    #[serde(alias = "content_length")]
    pub size: u64,
    #[serde(
        default,
        alias = "lastModified",
        deserialize_with = "deserialize_timestamp"
    )]
    pub last_modified: Option<DateTime<Utc>>,
}

/// Parse a listing export. A document starting with `[` is a JSON array,
/// anything else is JSON Lines (blank lines skipped).
pub fn parse_listing(raw: &str, origin: &Path) -> Result<Vec<ListingEntry>> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|err| NbrError::SnapshotParse {
            path: origin.to_path_buf(),
            details: err.to_string(),
        });
    }

    let mut entries = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry = serde_json::from_str(line).map_err(|err| NbrError::SnapshotParse {
            path: origin.to_path_buf(),
            details: format!("line {}: {err}", idx + 1),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// In-memory prefix tree over one container/prefix of a listing export.
#[derive(Debug, Default)]
pub struct ListingProvider {
    label: String,
    nodes: HashMap<String, Vec<Child>>,
    leaves: HashMap<String, AttributeRecord>,
}

impl ListingProvider {
    /// Load `path` and index the objects of `container` under `prefix`.
    pub fn load(path: &Path, container: &str, prefix: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| NbrError::io(path, source))?;
        let entries = parse_listing(&raw, path)?;
        Ok(Self::from_entries(
            format!("listing:{}:{container}/{}", path.display(), prefix.trim_matches('/')),
            container,
            prefix,
            entries,
        ))
    }

    /// Index `entries`. Names have a leading `/<container>/` stripped; only
    /// names under `prefix` are kept, re-rooted so keys are relative to it.
    pub fn from_entries(
        label: impl Into<String>,
        container: &str,
        prefix: &str,
        entries: impl IntoIterator<Item = ListingEntry>,
    ) -> Self {
        let container_prefix = format!("/{}/", container.trim_matches('/'));
        let prefix = prefix.trim_matches('/');

        let mut provider = Self {
            label: label.into(),
            ..Self::default()
        };
        provider.nodes.insert(String::new(), Vec::new());
        let mut known_nodes: HashSet<String> = HashSet::new();

        for entry in entries {
            let name = entry
                .name
                .strip_prefix(&container_prefix)
                .unwrap_or(&entry.name);
            let Some(relative) = relative_to_prefix(name, prefix) else {
                continue;
            };
            // Zero-length directory markers ("photos/") carry no object.
            if relative.ends_with('/') {
                continue;
            }
            let parts: Vec<&str> = relative.split('/').filter(|p| !p.is_empty()).collect();
            let Some((leaf_name, dirs)) = parts.split_last() else {
                continue;
            };

            let mut parent = String::new();
            for dir in dirs {
                let node = join_key(&parent, dir);
                if known_nodes.insert(node.clone()) {
                    provider
                        .nodes
                        .entry(parent.clone())
                        .or_default()
                        .push(Child::Node(node.clone()));
                    provider.nodes.entry(node.clone()).or_default();
                }
                parent = node;
            }

            let key = join_key(&parent, leaf_name);
            let record = AttributeRecord::new(entry.size, entry.last_modified);
            if provider.leaves.insert(key.clone(), record).is_none() {
                provider
                    .nodes
                    .entry(parent)
                    .or_default()
                    .push(Child::Leaf(key));
            }
        }
        provider
    }

    /// Number of distinct objects indexed.
    pub fn object_count(&self) -> usize {
        self.leaves.len()
    }
}

fn relative_to_prefix<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    let name = name.trim_start_matches('/');
    if prefix.is_empty() {
        return Some(name);
    }
    name.strip_prefix(prefix)?.strip_prefix('/')
}

impl NamespaceProvider for ListingProvider {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn list_children(&self, node: &str) -> Result<Vec<Child>> {
        self.nodes
            .get(node)
            .cloned()
            .ok_or_else(|| NbrError::provider(node, "unknown prefix"))
    }

    fn attributes(&self, leaf: &str) -> Result<AttributeRecord> {
        self.leaves
            .get(leaf)
            .copied()
            .ok_or_else(|| NbrError::provider(leaf, "object not found"))
    }
}
