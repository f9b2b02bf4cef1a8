//! Local filesystem provider: directories are nodes, regular files are leaves.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::core::errors::{NbrError, Result};
use crate::inventory::provider::{Child, NamespaceProvider, join_key};
use crate::inventory::snapshot::AttributeRecord;

/// Crawls a directory tree rooted at `root`.
///
/// Symlinks are skipped unless `follow_symlinks` is set, in which case they
/// are classified by their target.
#[derive(Debug, Clone)]
pub struct LocalFsProvider {
    root: PathBuf,
    follow_symlinks: bool,
    verbose: bool,
}

impl LocalFsProvider {
    /// The root must exist and be a directory.
    pub fn new(root: impl Into<PathBuf>, follow_symlinks: bool) -> Result<Self> {
        let root = root.into();
        let meta = fs::metadata(&root).map_err(|err| NbrError::InvalidRoot {
            root: root.display().to_string(),
            details: err.to_string(),
        })?;
        if !meta.is_dir() {
            return Err(NbrError::InvalidRoot {
                root: root.display().to_string(),
                details: "not a directory".to_string(),
            });
        }
        Ok(Self {
            root,
            follow_symlinks,
            verbose: false,
        })
    }

    /// Report skipped dangling symlinks on stderr.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of a relative key.
    pub fn resolve(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    /// Classify directory entries. An unreadable entry fails the whole node
    /// so the builder records it as a skipped subtree.
    fn collect_children<I>(&self, node: &str, dir: &Path, entries: I) -> Result<Vec<Child>>
    where
        I: IntoIterator<Item = std::io::Result<fs::DirEntry>>,
    {
        let mut children = Vec::new();
        for entry_result in entries {
            let entry = entry_result.map_err(|err| {
                NbrError::provider(node, format!("reading entry of {}: {err}", dir.display()))
            })?;

            let name_os = entry.file_name();
            let Some(name) = name_os.to_str() else {
                eprintln!(
                    "[NBR-WALK] skipping non-UTF-8 name under {}: {}",
                    dir.display(),
                    name_os.to_string_lossy()
                );
                continue;
            };

            let ft = entry.file_type().map_err(|err| {
                NbrError::provider(node, format!("file type of {}: {err}", entry.path().display()))
            })?;

            let (is_dir, is_file) = if ft.is_symlink() {
                if !self.follow_symlinks {
                    continue;
                }
                match fs::metadata(entry.path()) {
                    Ok(target) => (target.is_dir(), target.is_file()),
                    Err(err) => {
                        if self.verbose {
                            eprintln!(
                                "[NBR-WALK] skipping dangling symlink {}: {err}",
                                entry.path().display()
                            );
                        }
                        continue;
                    }
                }
            } else {
                (ft.is_dir(), ft.is_file())
            };

            let key = join_key(node, name);
            if is_dir {
                children.push(Child::Node(key));
            } else if is_file {
                children.push(Child::Leaf(key));
            }
        }
        Ok(children)
    }
}

impl NamespaceProvider for LocalFsProvider {
    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }

    fn list_children(&self, node: &str) -> Result<Vec<Child>> {
        let dir = self.resolve(node);
        let entries = fs::read_dir(&dir).map_err(|err| NbrError::provider(node, err.to_string()))?;
        self.collect_children(node, &dir, entries)
    }

    fn attributes(&self, leaf: &str) -> Result<AttributeRecord> {
        let path = self.resolve(leaf);
        let meta = metadata_for_path(&path, self.follow_symlinks)
            .map_err(|err| NbrError::provider(leaf, err.to_string()))?;
        Ok(AttributeRecord {
            size: meta.len(),
            last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }
}

fn metadata_for_path(path: &Path, follow_symlinks: bool) -> std::io::Result<fs::Metadata> {
    if follow_symlinks {
        fs::metadata(path)
    } else {
        fs::symlink_metadata(path)
    }
}
