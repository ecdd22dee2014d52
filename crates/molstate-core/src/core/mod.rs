//! # Core Module
//!
//! Stateless building blocks of the state graph.
//!
//! ## Architecture
//!
//! - **Graph Values** ([`models`]) - Refs, transform nodes, state objects, and parameters
//! - **Persistent Tree** ([`tree`]) - The immutable [`tree::StateTree`] and its structural diff
//!
//! Nothing in this module performs I/O or holds interior mutability apart from the
//! dispose-once guard carried by [`models::object::StateObject`] resources.

pub mod models;
pub mod tree;
