//! Namespace providers: the two primitives the inventory builder needs from
//! a backend — list the immediate children of a node, and fetch a leaf's
//! attributes.
//!
//! Nodes and leaves are addressed by their key relative to the provider's
//! root, `/`-separated, with the root itself as the empty string.

use crate::core::errors::Result;
use crate::inventory::snapshot::AttributeRecord;

/// One immediate child of a listed node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Child {
    /// Object with attributes; the key is relative to the provider root.
    Leaf(String),
    /// Directory or common prefix to descend into.
    Node(String),
}

impl Child {
    /// Relative key of this child.
    pub fn key(&self) -> &str {
        match self {
            Self::Leaf(key) | Self::Node(key) => key,
        }
    }
}

/// Hierarchical namespace the builder can crawl.
///
/// Implementations must be safe to call from many worker threads at once;
/// both calls may block (disk or network) and are always made without any
/// builder lock held.
pub trait NamespaceProvider: Send + Sync {
    /// Human-readable root description for logs and reports.
    fn describe(&self) -> String;

    /// List the immediate children of `node` (`""` is the root).
    fn list_children(&self, node: &str) -> Result<Vec<Child>>;

    /// Attribute lookup for one leaf previously returned by `list_children`.
    fn attributes(&self, leaf: &str) -> Result<AttributeRecord>;
}

/// Join a parent key and a child name with `/`, treating `""` as the root.
pub fn join_key(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}
