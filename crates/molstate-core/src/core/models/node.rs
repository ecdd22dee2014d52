use super::ids::{Ref, TransformerId};
use super::params::Params;
use serde::{Deserialize, Serialize};

/// Per-node view state owned by the tree, not by the computed cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFlags {
    pub collapsed: bool,
    pub hidden: bool,
}

/// A single entry of the state tree: which transformer to run, with which
/// parameters, under which parent.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformNode {
    pub node_ref: Ref,
    /// `None` only for the root.
    pub parent: Option<Ref>,
    pub transformer: TransformerId,
    pub params: Params,
    pub tag: Option<String>,
    pub flags: NodeFlags,
}

impl TransformNode {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Optional attributes of a node being added to the tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOptions {
    /// A pre-allocated ref. A fresh one is generated when absent.
    pub node_ref: Option<Ref>,
    pub tag: Option<String>,
    pub flags: NodeFlags,
}

impl NodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ref(mut self, node_ref: Ref) -> Self {
        self.node_ref = Some(node_ref);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_flags(mut self, flags: NodeFlags) -> Self {
        self.flags = flags;
        self
    }
}
