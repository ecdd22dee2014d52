//! # State Tree Module
//!
//! The persistent transform tree and the structural diff between two snapshots.
//!
//! - [`state_tree`] - [`state_tree::StateTree`], its pure edit operations and [`state_tree::TreeError`]
//! - [`diff`] - [`diff::TreeDiff`], the direct deltas between an old and a new tree
//!
//! The tree only reports *direct* changes. Deciding which descendants must be
//! recomputed because an ancestor changed is the update engine's job.

pub mod diff;
pub mod state_tree;

pub use diff::TreeDiff;
pub use state_tree::{ROOT_TRANSFORMER, StateTree, TreeError};
