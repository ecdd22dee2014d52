use crate::core::models::ids::{Ref, TransformerId};
use crate::core::models::node::{NodeFlags, NodeOptions, TransformNode};
use crate::core::models::params::Params;
use indexmap::IndexSet;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Transformer id of the root node.
pub const ROOT_TRANSFORMER: TransformerId = TransformerId::from_static("root");

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Moving {node} under {new_parent} would create a cycle")]
    CyclicDependency { node: Ref, new_parent: Ref },

    #[error("Parent {0} does not exist in the state tree")]
    MissingParent(Ref),

    #[error("Node {0} does not exist in the state tree")]
    NodeNotFound(Ref),

    #[error("Node {0} already exists in the state tree")]
    DuplicateRef(Ref),

    #[error("The root node cannot be moved or reconfigured")]
    RootImmutable,
}

/// An immutable snapshot of the transform tree.
///
/// Every mutating operation takes `&self` and returns a new tree. Nodes and child
/// sets are shared between snapshots behind `Arc`s and copied only when an edit
/// touches them, so older snapshots remain valid and cheap to keep around.
#[derive(Debug, Clone)]
pub struct StateTree {
    nodes: HashMap<Ref, Arc<TransformNode>>,
    children: HashMap<Ref, Arc<IndexSet<Ref>>>,
}

impl Default for StateTree {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTree {
    /// Creates a tree containing only the root node.
    pub fn new() -> Self {
        let root = TransformNode {
            node_ref: Ref::ROOT,
            parent: None,
            transformer: ROOT_TRANSFORMER,
            params: Params::new(),
            tag: None,
            flags: NodeFlags::default(),
        };
        let mut nodes = HashMap::new();
        nodes.insert(Ref::ROOT, Arc::new(root));
        let mut children = HashMap::new();
        children.insert(Ref::ROOT, Arc::new(IndexSet::new()));
        Self { nodes, children }
    }

    pub fn root(&self) -> Ref {
        Ref::ROOT
    }

    pub fn node(&self, node_ref: Ref) -> Option<&TransformNode> {
        self.nodes.get(&node_ref).map(Arc::as_ref)
    }

    pub(crate) fn node_arc(&self, node_ref: Ref) -> Option<&Arc<TransformNode>> {
        self.nodes.get(&node_ref)
    }

    pub fn contains(&self, node_ref: Ref) -> bool {
        self.nodes.contains_key(&node_ref)
    }

    pub fn parent(&self, node_ref: Ref) -> Option<Ref> {
        self.nodes.get(&node_ref).and_then(|n| n.parent)
    }

    /// Children of `node_ref` in insertion order. Empty for unknown refs.
    pub fn children(&self, node_ref: Ref) -> impl Iterator<Item = Ref> + '_ {
        self.children
            .get(&node_ref)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Walks from the parent of `node_ref` up to the root.
    pub fn ancestors(&self, node_ref: Ref) -> impl Iterator<Item = Ref> + '_ {
        let mut next = self.parent(node_ref);
        std::iter::from_fn(move || {
            let current = next?;
            next = self.parent(current);
            Some(current)
        })
    }

    /// `node_ref` followed by its whole subtree, in pre-order.
    pub fn descendants(&self, node_ref: Ref) -> Vec<Ref> {
        if !self.contains(node_ref) {
            return Vec::new();
        }
        let mut order = Vec::new();
        let mut stack = vec![node_ref];
        while let Some(current) = stack.pop() {
            order.push(current);
            if let Some(set) = self.children.get(&current) {
                stack.extend(set.iter().rev().copied());
            }
        }
        order
    }

    pub fn is_descendant_of(&self, node_ref: Ref, ancestor: Ref) -> bool {
        self.ancestors(node_ref).any(|a| a == ancestor)
    }

    /// All nodes in pre-order, starting at the root.
    pub fn iter(&self) -> impl Iterator<Item = &TransformNode> + '_ {
        self.descendants(Ref::ROOT)
            .into_iter()
            .filter_map(|r| self.node(r))
    }

    pub fn find_by_tag(&self, tag: &str) -> Option<Ref> {
        self.iter()
            .find(|n| n.tag.as_deref() == Some(tag))
            .map(|n| n.node_ref)
    }

    pub fn add_node(
        &self,
        parent: Ref,
        transformer: TransformerId,
        params: Params,
        options: NodeOptions,
    ) -> Result<(Self, Ref), TreeError> {
        if !self.contains(parent) {
            return Err(TreeError::MissingParent(parent));
        }
        let node_ref = options.node_ref.unwrap_or_default();
        if self.contains(node_ref) {
            return Err(TreeError::DuplicateRef(node_ref));
        }

        let mut next = self.clone();
        next.nodes.insert(
            node_ref,
            Arc::new(TransformNode {
                node_ref,
                parent: Some(parent),
                transformer,
                params,
                tag: options.tag,
                flags: options.flags,
            }),
        );
        next.children.insert(node_ref, Arc::new(IndexSet::new()));
        next.child_set_mut(parent).insert(node_ref);
        Ok((next, node_ref))
    }

    /// Removes `node_ref` and its entire subtree. Removing the root clears all of
    /// its children but keeps the root itself.
    pub fn remove_node(&self, node_ref: Ref) -> Result<Self, TreeError> {
        let node = self
            .nodes
            .get(&node_ref)
            .ok_or(TreeError::NodeNotFound(node_ref))?;

        let mut next = self.clone();
        match node.parent {
            Some(parent) => {
                next.child_set_mut(parent).shift_remove(&node_ref);
                for r in self.descendants(node_ref) {
                    next.nodes.remove(&r);
                    next.children.remove(&r);
                }
            }
            None => {
                for child in self.children(node_ref) {
                    for r in self.descendants(child) {
                        next.nodes.remove(&r);
                        next.children.remove(&r);
                    }
                }
                next.children.insert(node_ref, Arc::new(IndexSet::new()));
            }
        }
        Ok(next)
    }

    /// Moves `node_ref` (with its subtree) under `new_parent`.
    pub fn reparent(&self, node_ref: Ref, new_parent: Ref) -> Result<Self, TreeError> {
        let node = self
            .nodes
            .get(&node_ref)
            .ok_or(TreeError::NodeNotFound(node_ref))?;
        let old_parent = node.parent.ok_or(TreeError::RootImmutable)?;
        if !self.contains(new_parent) {
            return Err(TreeError::MissingParent(new_parent));
        }
        if new_parent == node_ref || self.is_descendant_of(new_parent, node_ref) {
            return Err(TreeError::CyclicDependency {
                node: node_ref,
                new_parent,
            });
        }
        if old_parent == new_parent {
            return Ok(self.clone());
        }

        let mut next = self.clone();
        next.child_set_mut(old_parent).shift_remove(&node_ref);
        next.child_set_mut(new_parent).insert(node_ref);
        next.node_mut(node_ref)?.parent = Some(new_parent);
        Ok(next)
    }

    pub fn set_params(&self, node_ref: Ref, params: Params) -> Result<Self, TreeError> {
        self.guard_not_root(node_ref)?;
        if self.node(node_ref).is_some_and(|n| n.params == params) {
            return Ok(self.clone());
        }
        let mut next = self.clone();
        next.node_mut(node_ref)?.params = params;
        Ok(next)
    }

    pub fn set_flags(&self, node_ref: Ref, flags: NodeFlags) -> Result<Self, TreeError> {
        if self.node(node_ref).is_some_and(|n| n.flags == flags) {
            return Ok(self.clone());
        }
        let mut next = self.clone();
        next.node_mut(node_ref)?.flags = flags;
        Ok(next)
    }

    pub fn set_tag(&self, node_ref: Ref, tag: Option<String>) -> Result<Self, TreeError> {
        self.guard_not_root(node_ref)?;
        let mut next = self.clone();
        next.node_mut(node_ref)?.tag = tag;
        Ok(next)
    }

    /// Checks that `children` is the exact inverse of `parent` and that every node
    /// is reachable from the root exactly once.
    pub fn is_consistent(&self) -> bool {
        let reachable = self.descendants(Ref::ROOT);
        let unique: HashSet<_> = reachable.iter().copied().collect();
        if unique.len() != reachable.len() || unique.len() != self.nodes.len() {
            return false;
        }
        self.nodes.values().all(|node| match node.parent {
            None => node.node_ref == Ref::ROOT,
            Some(p) => self
                .children
                .get(&p)
                .is_some_and(|set| set.contains(&node.node_ref)),
        })
    }

    fn guard_not_root(&self, node_ref: Ref) -> Result<(), TreeError> {
        match self.nodes.get(&node_ref) {
            None => Err(TreeError::NodeNotFound(node_ref)),
            Some(n) if n.is_root() => Err(TreeError::RootImmutable),
            Some(_) => Ok(()),
        }
    }

    fn node_mut(&mut self, node_ref: Ref) -> Result<&mut TransformNode, TreeError> {
        self.nodes
            .get_mut(&node_ref)
            .map(Arc::make_mut)
            .ok_or(TreeError::NodeNotFound(node_ref))
    }

    fn child_set_mut(&mut self, node_ref: Ref) -> &mut IndexSet<Ref> {
        Arc::make_mut(self.children.entry(node_ref).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOUBLE: TransformerId = TransformerId::from_static("number.double");

    fn add(tree: &StateTree, parent: Ref) -> (StateTree, Ref) {
        tree.add_node(parent, DOUBLE, Params::new(), NodeOptions::new())
            .unwrap()
    }

    /// root -> a -> (b, c), root -> d
    fn sample_tree() -> (StateTree, [Ref; 4]) {
        let tree = StateTree::new();
        let (tree, a) = add(&tree, Ref::ROOT);
        let (tree, b) = add(&tree, a);
        let (tree, c) = add(&tree, a);
        let (tree, d) = add(&tree, Ref::ROOT);
        (tree, [a, b, c, d])
    }

    mod structure {
        use super::*;

        #[test]
        fn new_tree_contains_only_the_root() {
            let tree = StateTree::new();
            assert_eq!(tree.len(), 1);
            assert!(tree.is_empty());
            assert_eq!(tree.node(Ref::ROOT).unwrap().transformer, ROOT_TRANSFORMER);
            assert!(tree.is_consistent());
        }

        #[test]
        fn add_node_links_parent_and_children() {
            let (tree, [a, b, c, d]) = sample_tree();
            assert_eq!(tree.parent(b), Some(a));
            assert_eq!(tree.children(a).collect::<Vec<_>>(), vec![b, c]);
            assert_eq!(tree.children(Ref::ROOT).collect::<Vec<_>>(), vec![a, d]);
            assert!(tree.is_consistent());
        }

        #[test]
        fn add_node_under_missing_parent_fails() {
            let tree = StateTree::new();
            let ghost = Ref::new();
            let err = tree
                .add_node(ghost, DOUBLE, Params::new(), NodeOptions::new())
                .unwrap_err();
            assert_eq!(err, TreeError::MissingParent(ghost));
        }

        #[test]
        fn add_node_with_preallocated_ref_uses_it_and_rejects_duplicates() {
            let tree = StateTree::new();
            let r = Ref::new();
            let (tree, added) = tree
                .add_node(Ref::ROOT, DOUBLE, Params::new(), NodeOptions::new().with_ref(r))
                .unwrap();
            assert_eq!(added, r);
            let err = tree
                .add_node(Ref::ROOT, DOUBLE, Params::new(), NodeOptions::new().with_ref(r))
                .unwrap_err();
            assert_eq!(err, TreeError::DuplicateRef(r));
        }

        #[test]
        fn descendants_are_listed_in_pre_order() {
            let (tree, [a, b, c, d]) = sample_tree();
            assert_eq!(tree.descendants(Ref::ROOT), vec![Ref::ROOT, a, b, c, d]);
            assert_eq!(tree.descendants(a), vec![a, b, c]);
            assert!(tree.descendants(Ref::new()).is_empty());
        }

        #[test]
        fn ancestors_walk_up_to_the_root() {
            let (tree, [a, b, ..]) = sample_tree();
            assert_eq!(tree.ancestors(b).collect::<Vec<_>>(), vec![a, Ref::ROOT]);
            assert!(tree.is_descendant_of(b, Ref::ROOT));
            assert!(!tree.is_descendant_of(a, b));
        }

        #[test]
        fn find_by_tag_returns_the_tagged_node() {
            let tree = StateTree::new();
            let (tree, a) = tree
                .add_node(Ref::ROOT, DOUBLE, Params::new(), NodeOptions::new().with_tag("model"))
                .unwrap();
            assert_eq!(tree.find_by_tag("model"), Some(a));
            assert_eq!(tree.find_by_tag("missing"), None);
        }
    }

    mod edits {
        use super::*;

        #[test]
        fn remove_node_drops_the_whole_subtree() {
            let (tree, [a, b, c, d]) = sample_tree();
            let next = tree.remove_node(a).unwrap();
            assert!(!next.contains(a) && !next.contains(b) && !next.contains(c));
            assert!(next.contains(d));
            assert_eq!(next.len(), 2);
            assert!(next.is_consistent());
        }

        #[test]
        fn remove_root_clears_children_but_keeps_root() {
            let (tree, _) = sample_tree();
            let next = tree.remove_node(Ref::ROOT).unwrap();
            assert_eq!(next.len(), 1);
            assert!(next.contains(Ref::ROOT));
            assert!(next.is_consistent());
        }

        #[test]
        fn remove_missing_node_fails() {
            let tree = StateTree::new();
            let ghost = Ref::new();
            assert_eq!(tree.remove_node(ghost).unwrap_err(), TreeError::NodeNotFound(ghost));
        }

        #[test]
        fn reparent_moves_subtree_under_new_parent() {
            let (tree, [a, b, _, d]) = sample_tree();
            let next = tree.reparent(a, d).unwrap();
            assert_eq!(next.parent(a), Some(d));
            assert_eq!(next.ancestors(b).collect::<Vec<_>>(), vec![a, d, Ref::ROOT]);
            assert_eq!(next.children(Ref::ROOT).collect::<Vec<_>>(), vec![d]);
            assert!(next.is_consistent());
        }

        #[test]
        fn reparent_under_itself_or_a_descendant_is_cyclic() {
            let (tree, [a, b, ..]) = sample_tree();
            assert_eq!(
                tree.reparent(a, a).unwrap_err(),
                TreeError::CyclicDependency { node: a, new_parent: a }
            );
            assert_eq!(
                tree.reparent(a, b).unwrap_err(),
                TreeError::CyclicDependency { node: a, new_parent: b }
            );
        }

        #[test]
        fn reparent_validates_refs_and_root() {
            let (tree, [a, ..]) = sample_tree();
            let ghost = Ref::new();
            assert_eq!(tree.reparent(a, ghost).unwrap_err(), TreeError::MissingParent(ghost));
            assert_eq!(tree.reparent(ghost, a).unwrap_err(), TreeError::NodeNotFound(ghost));
            assert_eq!(tree.reparent(Ref::ROOT, a).unwrap_err(), TreeError::RootImmutable);
        }

        #[test]
        fn set_params_and_flags_update_only_the_target() {
            let (tree, [a, b, ..]) = sample_tree();
            let params = Params::new().with("factor", 3.0);
            let next = tree.set_params(a, params.clone()).unwrap();
            let next = next
                .set_flags(b, NodeFlags { collapsed: true, hidden: false })
                .unwrap();
            assert_eq!(next.node(a).unwrap().params, params);
            assert!(next.node(b).unwrap().flags.collapsed);
            assert!(tree.node(a).unwrap().params.is_empty());
        }

        #[test]
        fn set_params_on_root_is_rejected() {
            let tree = StateTree::new();
            assert_eq!(
                tree.set_params(Ref::ROOT, Params::new()).unwrap_err(),
                TreeError::RootImmutable
            );
        }
    }

    mod persistence {
        use super::*;

        #[test]
        fn old_snapshots_are_unaffected_by_edits() {
            let (tree, [a, b, c, d]) = sample_tree();
            let _ = tree.remove_node(a).unwrap().reparent(d, Ref::ROOT).unwrap();
            assert_eq!(tree.descendants(Ref::ROOT), vec![Ref::ROOT, a, b, c, d]);
        }

        #[test]
        fn untouched_nodes_are_shared_between_snapshots() {
            let (tree, [a, b, _, d]) = sample_tree();
            let next = tree.set_params(b, Params::new().with("x", 1.0)).unwrap();
            assert!(Arc::ptr_eq(tree.node_arc(a).unwrap(), next.node_arc(a).unwrap()));
            assert!(Arc::ptr_eq(tree.node_arc(d).unwrap(), next.node_arc(d).unwrap()));
            assert!(!Arc::ptr_eq(tree.node_arc(b).unwrap(), next.node_arc(b).unwrap()));
        }

        #[test]
        fn random_edit_sequences_keep_the_tree_acyclic() {
            let mut tree = StateTree::new();
            let mut refs = vec![Ref::ROOT];
            let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
            let mut next_index = |len: usize| {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                (seed % len as u64) as usize
            };

            for step in 0..400 {
                let pick = refs[next_index(refs.len())];
                let other = refs[next_index(refs.len())];
                tree = match step % 4 {
                    0 | 1 => {
                        let (t, r) = add(&tree, pick);
                        refs.push(r);
                        t
                    }
                    2 => tree.reparent(pick, other).unwrap_or(tree),
                    _ if !pick.is_root() && next_index(3) == 0 => tree.remove_node(pick).unwrap(),
                    _ => tree,
                };
                refs.retain(|r| tree.contains(*r));

                assert!(tree.is_consistent());
                for r in &refs {
                    let chain: Vec<_> = tree.ancestors(*r).collect();
                    let unique: HashSet<_> = chain.iter().collect();
                    assert_eq!(chain.len(), unique.len());
                    assert!(r.is_root() || chain.last() == Some(&Ref::ROOT));
                }
            }
        }
    }
}
