use crate::core::models::ids::Ref;
use crate::core::models::node::NodeFlags;
use crate::core::tree::{StateTree, TreeError};
use crate::engine::cell::{Cell, CellStore};
use crate::engine::config::EngineConfig;
use crate::engine::error::EngineError;
use crate::engine::events::{
    CellUpdated, CurrentChanged, ObjectCreated, ObjectRemoved, StateEvents, Subscription,
    TreeChanged,
};
use crate::engine::progress::ProgressReporter;
use crate::engine::registry::{TransformerDefinition, TransformerRegistry};
use crate::engine::transaction::Transaction;
use crate::engine::update::{TransactionResult, UpdateEngine};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// One reactive state graph: tree, cells, registry and event bus.
///
/// `Session` is `Send + Sync`; share it behind an `Arc` to submit transactions
/// from several tasks. Transactions are serialized for their structural part
/// and overlap freely while their transformers run.
pub struct Session {
    engine: UpdateEngine,
    current: Mutex<Ref>,
    busy: AtomicUsize,
}

impl Session {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(config, Arc::new(TransformerRegistry::new()))
    }

    /// Creates a session over an existing registry, which may be shared with
    /// other sessions.
    pub fn with_registry(config: EngineConfig, registry: Arc<TransformerRegistry>) -> Self {
        let events = Arc::new(StateEvents::new());
        Self {
            engine: UpdateEngine::new(config, registry, events),
            current: Mutex::new(Ref::ROOT),
            busy: AtomicUsize::new(0),
        }
    }

    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.engine = self.engine.with_reporter(reporter);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        self.engine.config()
    }

    pub fn registry(&self) -> &Arc<TransformerRegistry> {
        self.engine.registry()
    }

    pub fn register_transformer(
        &self,
        definition: TransformerDefinition,
    ) -> Result<(), EngineError> {
        Ok(self.engine.registry().register(definition)?)
    }

    /// Applies `tx` and waits until every recomputation it triggered has
    /// committed or been superseded.
    pub async fn submit_transaction(
        &self,
        tx: Transaction,
    ) -> Result<TransactionResult, EngineError> {
        let _busy = BusyGuard::enter(self);
        let before = self.engine.tree();
        let result = self.engine.apply(&tx).await?;
        if result.diff.has_structural_changes() {
            self.repair_current(&before);
        }
        Ok(result)
    }

    pub fn get_cell(&self, node_ref: Ref) -> Option<Arc<Cell>> {
        self.engine.cells().get(node_ref)
    }

    pub fn get_tree(&self) -> Arc<StateTree> {
        self.engine.tree()
    }

    pub fn cells(&self) -> HashMap<Ref, Arc<Cell>> {
        self.engine.cells().snapshot()
    }

    /// The cell store itself, for waiting on cells.
    pub fn cell_store(&self) -> &Arc<CellStore> {
        self.engine.cells()
    }

    pub fn events(&self) -> &StateEvents {
        self.engine.events()
    }

    pub fn on_tree_changed(
        &self,
        handler: impl Fn(&TreeChanged) + Send + Sync + 'static,
    ) -> Subscription {
        self.events().tree_changed.subscribe(handler)
    }

    /// Subscribes to updates of a single cell.
    pub fn on_cell_updated(
        &self,
        node_ref: Ref,
        handler: impl Fn(&CellUpdated) + Send + Sync + 'static,
    ) -> Subscription {
        self.events().cell_updated.subscribe(move |event: &CellUpdated| {
            if event.node_ref == node_ref {
                handler(event);
            }
        })
    }

    pub fn on_object_created(
        &self,
        handler: impl Fn(&ObjectCreated) + Send + Sync + 'static,
    ) -> Subscription {
        self.events().object_created.subscribe(handler)
    }

    pub fn on_object_removed(
        &self,
        handler: impl Fn(&ObjectRemoved) + Send + Sync + 'static,
    ) -> Subscription {
        self.events().object_removed.subscribe(handler)
    }

    pub fn current(&self) -> Ref {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Selects the current object. Fails if `node_ref` is not in the tree.
    pub fn set_current(&self, node_ref: Ref) -> Result<(), EngineError> {
        if !self.engine.tree().contains(node_ref) {
            return Err(TreeError::NodeNotFound(node_ref).into());
        }
        self.change_current(node_ref);
        Ok(())
    }

    /// Flips the collapsed flag of a node in the tree view.
    pub async fn toggle_expanded(
        &self,
        node_ref: Ref,
    ) -> Result<TransactionResult, EngineError> {
        self.update_flags(node_ref, |flags| flags.collapsed = !flags.collapsed)
            .await
    }

    /// Flips the hidden flag of a node.
    pub async fn toggle_visibility(
        &self,
        node_ref: Ref,
    ) -> Result<TransactionResult, EngineError> {
        self.update_flags(node_ref, |flags| flags.hidden = !flags.hidden)
            .await
    }

    /// Whether any transaction is being applied.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst) > 0
    }

    async fn update_flags(
        &self,
        node_ref: Ref,
        update: impl FnOnce(&mut NodeFlags),
    ) -> Result<TransactionResult, EngineError> {
        let tree = self.engine.tree();
        let node = tree.node(node_ref).ok_or(TreeError::NodeNotFound(node_ref))?;
        let mut flags = node.flags;
        update(&mut flags);
        let mut tx = Transaction::new();
        tx.set_flags(node_ref, flags);
        self.submit_transaction(tx).await
    }

    /// Moves the current selection to the nearest surviving ancestor when the
    /// selected node was removed.
    fn repair_current(&self, before: &StateTree) {
        let tree = self.engine.tree();
        let current = self.current();
        if tree.contains(current) {
            return;
        }
        let fallback = before
            .ancestors(current)
            .find(|r| tree.contains(*r))
            .unwrap_or(Ref::ROOT);
        debug!(removed = %current, fallback = %fallback, "Current object removed.");
        self.change_current(fallback);
    }

    fn change_current(&self, next: Ref) {
        let previous = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, next)
        };
        if previous != next {
            self.events().current_changed.publish(&CurrentChanged {
                previous,
                current: next,
            });
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("engine", &self.engine)
            .field("current", &self.current())
            .field("busy", &self.is_busy())
            .finish()
    }
}

/// Publishes `is_busy` transitions around one transaction.
struct BusyGuard<'a> {
    session: &'a Session,
}

impl<'a> BusyGuard<'a> {
    fn enter(session: &'a Session) -> Self {
        if session.busy.fetch_add(1, Ordering::SeqCst) == 0 {
            info!("Session busy.");
            session.events().is_busy.publish(&true);
        }
        Self { session }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if self.session.busy.fetch_sub(1, Ordering::SeqCst) == 1 {
            info!("Session idle.");
            self.session.events().is_busy.publish(&false);
        }
    }
}
