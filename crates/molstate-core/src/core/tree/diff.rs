use super::state_tree::StateTree;
use crate::core::models::ids::Ref;
use indexmap::IndexSet;
use std::sync::Arc;

/// Direct, structural deltas between two tree snapshots.
///
/// Refs present in the new tree are listed in its pre-order; removed refs in the
/// pre-order of the old tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    pub added: IndexSet<Ref>,
    pub removed: IndexSet<Ref>,
    pub reparented: IndexSet<Ref>,
    pub params_changed: IndexSet<Ref>,
    /// Collapsed/hidden changes. Never a reason to recompute.
    pub flags_changed: IndexSet<Ref>,
    pub tags_changed: IndexSet<Ref>,
}

impl TreeDiff {
    pub fn between(old: &StateTree, new: &StateTree) -> Self {
        let mut diff = TreeDiff::default();

        for node in new.iter() {
            let r = node.node_ref;
            let Some(before) = old.node_arc(r) else {
                diff.added.insert(r);
                continue;
            };
            if new.node_arc(r).is_some_and(|after| Arc::ptr_eq(before, after)) {
                continue;
            }
            if before.parent != node.parent {
                diff.reparented.insert(r);
            }
            if before.params != node.params || before.transformer != node.transformer {
                diff.params_changed.insert(r);
            }
            if before.flags != node.flags {
                diff.flags_changed.insert(r);
            }
            if before.tag != node.tag {
                diff.tags_changed.insert(r);
            }
        }

        for node in old.iter() {
            if !new.contains(node.node_ref) {
                diff.removed.insert(node.node_ref);
            }
        }

        diff
    }

    /// Refs whose own computation inputs changed directly.
    pub fn dirty(&self) -> impl Iterator<Item = Ref> + '_ {
        self.added
            .iter()
            .chain(self.reparented.iter())
            .chain(self.params_changed.iter())
            .copied()
    }

    pub fn has_structural_changes(&self) -> bool {
        !(self.added.is_empty() && self.removed.is_empty() && self.reparented.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        !self.has_structural_changes()
            && self.params_changed.is_empty()
            && self.flags_changed.is_empty()
            && self.tags_changed.is_empty()
    }
}

/// Convenience wrapper over [`TreeDiff::between`].
pub fn diff(old: &StateTree, new: &StateTree) -> TreeDiff {
    TreeDiff::between(old, new)
}
