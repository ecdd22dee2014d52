//! # MolState Core Library
//!
//! A reactive, transactional state graph for molecular visualization. A tree of
//! *transforms* derives immutable, typed *state objects* from the outputs of their
//! parents, and the graph recomputes only what an edit actually touched.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Stateless values: refs, transform nodes, state
//!   objects, parameter schemas, and the persistent [`core::tree::StateTree`] with
//!   its structural diff. Every edit produces a new tree; old snapshots stay valid.
//!
//! - **[`engine`]: The Logic Core.** The stateful runtime: the version-gated
//!   [`engine::cell::CellStore`], the [`engine::registry::TransformerRegistry`],
//!   the synchronous [`engine::events`] bus, and the update engine that schedules
//!   transformer execution across independent branches.
//!
//! - **[`workflows`]: The Public API.** [`workflows::session::Session`] ties the
//!   engine together and is the single entry point for submitting transactions,
//!   reading cells, and subscribing to changes.

pub mod core;
pub mod engine;
pub mod workflows;
