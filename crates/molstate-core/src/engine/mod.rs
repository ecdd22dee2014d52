//! # Engine Module
//!
//! The stateful runtime of MolState: it owns the cells derived from the state
//! tree and keeps them consistent with it as transactions arrive.
//!
//! ## Overview
//!
//! A transaction is validated and applied to the tree under a single writer
//! lock. The engine then diffs the old and new trees, invalidates every cell
//! whose inputs changed (plus all of their descendants), and runs the
//! corresponding transformers in dependency order. Independent branches run
//! concurrently; commits are gated by a per-cell version so that a superseded
//! computation can never overwrite a newer result.
//!
//! ## Architecture
//!
//! - **Cells** ([`cell`]) - Version-gated store of computed objects, status and errors
//! - **Registry** ([`registry`]) - Catalog of transformers with their parameter schemas
//! - **Transactions** ([`transaction`]) - Ordered, atomic batches of tree edits
//! - **Update Engine** ([`update`]) - Invalidation, scheduling, commits and event publishing
//! - **Events** ([`events`]) - Typed, synchronous publish/subscribe channels
//! - **Configuration** ([`config`]) - Concurrency limits and error presentation
//! - **Progress Monitoring** ([`progress`]) - Coarse callbacks for progress displays
//! - **Error Handling** ([`error`]) - Engine-level error type
//!
//! ## Key Capabilities
//!
//! - **Minimal recomputation**: only edited nodes and their subtrees are invalidated
//! - **Cancellation by staleness**: in-flight work is never interrupted, only discarded
//! - **Error isolation**: a failing transformer poisons its own subtree and nothing else
//! - **Exactly-once disposal** of resources held by state objects

pub mod cell;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod progress;
pub mod registry;
pub mod transaction;
pub mod update;
