use super::error::EngineError;
use super::registry::RegistrySnapshot;
use crate::core::models::ids::{Ref, TransformerId};
use crate::core::models::node::{NodeFlags, NodeOptions};
use crate::core::models::params::Params;
use crate::core::tree::{StateTree, TreeError};

/// One step of a [`Transaction`].
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    Add {
        parent: Ref,
        transformer: TransformerId,
        params: Params,
        options: NodeOptions,
    },
    Remove(Ref),
    Reparent {
        node_ref: Ref,
        new_parent: Ref,
    },
    SetParams {
        node_ref: Ref,
        params: Params,
    },
    SetFlags {
        node_ref: Ref,
        flags: NodeFlags,
    },
    SetTag {
        node_ref: Ref,
        tag: Option<String>,
    },
}

/// An ordered batch of edits applied atomically.
///
/// Edits run in order against a working copy of the tree, so later edits see
/// the effect of earlier ones (a node added here can be a parent two lines
/// down). The batch as a whole is then diffed against the tree it started
/// from; intermediate states are never observable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    edits: Vec<Edit>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the addition of a node and returns the ref it will have.
    pub fn add(
        &mut self,
        parent: Ref,
        transformer: impl Into<TransformerId>,
        params: Params,
    ) -> Ref {
        self.add_with(parent, transformer, params, NodeOptions::new())
    }

    pub fn add_with(
        &mut self,
        parent: Ref,
        transformer: impl Into<TransformerId>,
        params: Params,
        mut options: NodeOptions,
    ) -> Ref {
        let node_ref = *options.node_ref.get_or_insert_with(Ref::new);
        self.edits.push(Edit::Add {
            parent,
            transformer: transformer.into(),
            params,
            options,
        });
        node_ref
    }

    pub fn remove(&mut self, node_ref: Ref) -> &mut Self {
        self.edits.push(Edit::Remove(node_ref));
        self
    }

    pub fn reparent(&mut self, node_ref: Ref, new_parent: Ref) -> &mut Self {
        self.edits.push(Edit::Reparent {
            node_ref,
            new_parent,
        });
        self
    }

    pub fn set_params(&mut self, node_ref: Ref, params: Params) -> &mut Self {
        self.edits.push(Edit::SetParams { node_ref, params });
        self
    }

    pub fn set_flags(&mut self, node_ref: Ref, flags: NodeFlags) -> &mut Self {
        self.edits.push(Edit::SetFlags { node_ref, flags });
        self
    }

    pub fn set_tag(&mut self, node_ref: Ref, tag: Option<String>) -> &mut Self {
        self.edits.push(Edit::SetTag { node_ref, tag });
        self
    }

    pub fn push(&mut self, edit: Edit) -> &mut Self {
        self.edits.push(edit);
        self
    }

    pub fn edits(&self) -> &[Edit] {
        &self.edits
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Validates every edit and applies the batch to `tree`.
    ///
    /// Parameters are normalized against the transformer's schema, so the
    /// resulting tree only ever holds complete, validated parameter sets.
    pub fn apply_to(
        &self,
        tree: &StateTree,
        registry: &RegistrySnapshot,
    ) -> Result<StateTree, EngineError> {
        let mut working = tree.clone();
        for edit in &self.edits {
            working = apply_edit(&working, edit, registry)?;
        }
        Ok(working)
    }
}

fn apply_edit(
    tree: &StateTree,
    edit: &Edit,
    registry: &RegistrySnapshot,
) -> Result<StateTree, EngineError> {
    match edit {
        Edit::Add {
            parent,
            transformer,
            params,
            options,
        } => {
            let params = normalize(registry, transformer, params)?;
            let (next, _) = tree.add_node(*parent, transformer.clone(), params, options.clone())?;
            Ok(next)
        }
        Edit::Remove(node_ref) => Ok(tree.remove_node(*node_ref)?),
        Edit::Reparent {
            node_ref,
            new_parent,
        } => Ok(tree.reparent(*node_ref, *new_parent)?),
        Edit::SetParams { node_ref, params } => {
            let node = tree
                .node(*node_ref)
                .ok_or(TreeError::NodeNotFound(*node_ref))?;
            if node.is_root() {
                return Err(TreeError::RootImmutable.into());
            }
            let params = normalize(registry, &node.transformer, params)?;
            Ok(tree.set_params(*node_ref, params)?)
        }
        Edit::SetFlags { node_ref, flags } => Ok(tree.set_flags(*node_ref, *flags)?),
        Edit::SetTag { node_ref, tag } => Ok(tree.set_tag(*node_ref, tag.clone())?),
    }
}

fn normalize(
    registry: &RegistrySnapshot,
    transformer: &TransformerId,
    params: &Params,
) -> Result<Params, EngineError> {
    let definition = registry
        .get(transformer)
        .ok_or_else(|| EngineError::UnknownTransformer(transformer.clone()))?;
    definition
        .param_schema
        .normalize(params)
        .map_err(|source| EngineError::InvalidParams {
            transformer: transformer.clone(),
            source,
        })
}
