//! Materializer: copy every key of a flat diff list from a source root to a
//! destination root, writing destination keys lower-cased.
//!
//! Keys in the flat list are already lower-cased, while the source tree keeps
//! its original casing, so each key is resolved exactly first and then by
//! case-insensitive component matching.

#![allow(missing_docs)]

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::core::errors::{NbrError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Resolve and report the plan without touching the destination.
    pub dry_run: bool,
    /// Abort on the first per-file failure instead of collecting it.
    pub fail_fast: bool,
}

/// One planned or completed copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyItem {
    pub key: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyFailure {
    pub key: String,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CopyReport {
    pub dry_run: bool,
    pub items: Vec<CopyItem>,
    pub failures: Vec<CopyFailure>,
}

impl CopyReport {
    pub fn copied(&self) -> usize {
        self.items.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.items
            .iter()
            .fold(0u64, |acc, item| acc.saturating_add(item.bytes))
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Materializer {
    source_root: PathBuf,
    destination_root: PathBuf,
    options: CopyOptions,
}

impl Materializer {
    /// The source root must be an existing directory; the destination is
    /// created on first copy.
    pub fn new(
        source_root: impl Into<PathBuf>,
        destination_root: impl Into<PathBuf>,
        options: CopyOptions,
    ) -> Result<Self> {
        let source_root = source_root.into();
        if !source_root.is_dir() {
            return Err(NbrError::InvalidRoot {
                root: source_root.display().to_string(),
                details: "copy source is not a directory".to_string(),
            });
        }
        Ok(Self {
            source_root,
            destination_root: destination_root.into(),
            options,
        })
    }

    /// Copy (or plan) every key. Per-key failures are collected unless
    /// `fail_fast` is set, in which case the first one is returned.
    pub fn run<S: AsRef<str>>(&self, keys: &[S]) -> Result<CopyReport> {
        let mut report = CopyReport {
            dry_run: self.options.dry_run,
            ..CopyReport::default()
        };

        if !self.options.dry_run {
            fs::create_dir_all(&self.destination_root)
                .map_err(|source| NbrError::io(&self.destination_root, source))?;
        }

        for key in keys {
            let key = key.as_ref();
            if key.is_empty() {
                continue;
            }
            match self.copy_one(key) {
                Ok(item) => report.items.push(item),
                Err(err) if self.options.fail_fast => return Err(err),
                Err(err) => report.failures.push(CopyFailure {
                    key: key.to_string(),
                    code: err.code(),
                    message: err.to_string(),
                }),
            }
        }
        Ok(report)
    }

    fn copy_one(&self, key: &str) -> Result<CopyItem> {
        let parts = key_components(key)?;
        let source = resolve_case_insensitive(&self.source_root, &parts).ok_or_else(|| {
            NbrError::io(
                self.source_root.join(key),
                std::io::Error::new(std::io::ErrorKind::NotFound, "source file not found"),
            )
        })?;
        let destination = parts
            .iter()
            .fold(self.destination_root.clone(), |path, part| {
                path.join(part.to_lowercase())
            });

        let meta = fs::metadata(&source).map_err(|err| NbrError::io(&source, err))?;
        if !meta.is_file() {
            return Err(NbrError::io(
                &source,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }

        let bytes = if self.options.dry_run {
            meta.len()
        } else {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent).map_err(|err| NbrError::io(parent, err))?;
            }
            fs::copy(&source, &destination).map_err(|err| NbrError::io(&destination, err))?
        };

        Ok(CopyItem {
            key: key.to_string(),
            source,
            destination,
            bytes,
        })
    }
}

/// Split a key into path components, rejecting anything that could escape
/// the roots (`..`, absolute paths, drive prefixes).
fn key_components(key: &str) -> Result<Vec<String>> {
    let normalized = key.replace('\\', "/");
    let mut parts = Vec::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(NbrError::Runtime {
                    details: format!("refusing to copy key outside the source root: {key:?}"),
                });
            }
        }
    }
    if parts.is_empty() {
        return Err(NbrError::Runtime {
            details: format!("empty key {key:?}"),
        });
    }
    Ok(parts)
}

/// Resolve `parts` under `root`, trying the exact name at each level before
/// falling back to the first case-insensitive match in sorted order.
fn resolve_case_insensitive(root: &Path, parts: &[String]) -> Option<PathBuf> {
    let exact = parts.iter().fold(root.to_path_buf(), |path, part| path.join(part));
    if exact.exists() {
        return Some(exact);
    }

    let mut current = root.to_path_buf();
    for part in parts {
        let direct = current.join(part);
        if direct.exists() {
            current = direct;
            continue;
        }
        let wanted = part.to_lowercase();
        let mut candidates: Vec<PathBuf> = fs::read_dir(&current)
            .ok()?
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().to_lowercase() == wanted)
            .map(|entry| entry.path())
            .collect();
        candidates.sort();
        current = candidates.into_iter().next()?;
    }
    Some(current)
}
