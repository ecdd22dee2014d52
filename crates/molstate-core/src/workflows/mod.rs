//! # Workflows Module
//!
//! High-level entry points of MolState.
//!
//! ## Overview
//!
//! A [`session::Session`] bundles one state tree, its cells, the transformer
//! registry and the event bus. Applications register transformers, submit
//! transactions, and observe the results either by reading cells directly or by
//! subscribing to the session's events.
//!
//! ## Architecture
//!
//! - **Session** ([`session`]) - Transaction submission, cell and tree queries,
//!   subscriptions, the current-object selection, and tree view toggles.

pub mod session;
