//! # Core Models Module
//!
//! Value types shared by every layer of the state graph.
//!
//! ## Key Components
//!
//! - [`ids`] - The opaque [`ids::Ref`] node identifier and [`ids::TransformerId`]
//! - [`node`] - [`node::TransformNode`] entries stored in the state tree
//! - [`object`] - Immutable [`object::StateObject`] payloads produced by transformers
//! - [`params`] - Parameter values and the schemas that validate them
//!
//! ```ignore
//! use molstate::core::models::{object::{ObjectKind, StateObject}, params::Params};
//!
//! let obj = StateObject::new(ObjectKind::new("number"), "10", 10.0_f64);
//! assert_eq!(obj.data::<f64>(), Some(&10.0));
//! ```

pub mod ids;
pub mod node;
pub mod object;
pub mod params;
