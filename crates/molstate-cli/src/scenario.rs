use crate::config::file::{FileEdit, FileTransaction, ROOT_TAG};
use crate::error::{CliError, Result};
use molstate::core::models::ids::Ref;
use molstate::core::models::node::{NodeFlags, NodeOptions};
use molstate::core::tree::StateTree;
use molstate::engine::transaction::Transaction;
use std::collections::HashMap;

/// Turns one scenario transaction into an engine [`Transaction`].
///
/// Tags resolve against nodes added earlier in the same transaction first,
/// then against the current tree. `index` is 1-based and only used in errors.
pub fn build_transaction(
    index: usize,
    file_tx: &FileTransaction,
    tree: &StateTree,
) -> Result<Transaction> {
    let error = |message: String| CliError::Scenario {
        transaction: index,
        message,
    };

    let mut staged: HashMap<&str, Ref> = HashMap::new();
    let resolve = |staged: &HashMap<&str, Ref>, tag: &str| -> Result<Ref> {
        if tag == ROOT_TAG {
            return Ok(Ref::ROOT);
        }
        staged
            .get(tag)
            .copied()
            .or_else(|| tree.find_by_tag(tag))
            .ok_or_else(|| error(format!("unknown tag '{}'", tag)))
    };

    let mut tx = Transaction::new();
    for edit in &file_tx.edit {
        match edit {
            FileEdit::Add {
                tag,
                parent,
                transformer,
                params,
                hidden,
                collapsed,
            } => {
                let taken = tag == ROOT_TAG
                    || staged.contains_key(tag.as_str())
                    || tree.find_by_tag(tag).is_some();
                if taken {
                    return Err(error(format!("tag '{}' is already in use", tag)));
                }
                let parent = resolve(&staged, parent)?;
                let options = NodeOptions::new().with_tag(tag.clone()).with_flags(NodeFlags {
                    hidden: *hidden,
                    collapsed: *collapsed,
                });
                let node_ref =
                    tx.add_with(parent, transformer.clone(), params.clone(), options);
                staged.insert(tag.as_str(), node_ref);
            }
            FileEdit::Remove { target } => {
                tx.remove(resolve(&staged, target)?);
            }
            FileEdit::Reparent { target, parent } => {
                tx.reparent(resolve(&staged, target)?, resolve(&staged, parent)?);
            }
            FileEdit::SetParams { target, params } => {
                tx.set_params(resolve(&staged, target)?, params.clone());
            }
            FileEdit::SetFlags {
                target,
                hidden,
                collapsed,
            } => {
                let node_ref = resolve(&staged, target)?;
                let current = tree
                    .node(node_ref)
                    .map(|node| node.flags)
                    .unwrap_or_else(|| flags_of_staged(file_tx, target));
                tx.set_flags(
                    node_ref,
                    NodeFlags {
                        hidden: hidden.unwrap_or(current.hidden),
                        collapsed: collapsed.unwrap_or(current.collapsed),
                    },
                );
            }
        }
    }
    Ok(tx)
}

/// Flags an `add` edit of the same transaction gave to `tag`.
fn flags_of_staged(file_tx: &FileTransaction, tag: &str) -> NodeFlags {
    file_tx
        .edit
        .iter()
        .find_map(|edit| match edit {
            FileEdit::Add {
                tag: added,
                hidden,
                collapsed,
                ..
            } if added == tag => Some(NodeFlags {
                hidden: *hidden,
                collapsed: *collapsed,
            }),
            _ => None,
        })
        .unwrap_or_default()
}
