use super::cell::{Cell, CellError, CellStatus, CellStore};
use super::config::EngineConfig;
use super::context::{TransformContext, TransformInput};
use super::error::EngineError;
use super::events::{
    CellUpdated, ObjectCreated, ObjectRemoved, ObjectUpdated, StateEvents, TreeChanged,
};
use super::progress::{Progress, ProgressReporter};
use super::registry::{TransformerDefinition, TransformerRegistry};
use super::transaction::Transaction;
use crate::core::models::ids::Ref;
use crate::core::models::object::StateObject;
use crate::core::models::params::Params;
use crate::core::tree::{StateTree, TreeDiff};
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use indexmap::{IndexMap, IndexSet};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, trace, warn};

/// How one affected ref ended up after a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefOutcome {
    Resolved {
        status: CellStatus,
        error_text: Option<String>,
    },
    /// The computation was superseded by a later transaction (or the node was
    /// removed) before it could commit.
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionResult {
    pub diff: TreeDiff,
    /// Outcomes of every recomputed ref, in topological order.
    pub outcomes: IndexMap<Ref, RefOutcome>,
}

impl TransactionResult {
    pub fn status(&self, node_ref: Ref) -> Option<CellStatus> {
        match self.outcomes.get(&node_ref)? {
            RefOutcome::Resolved { status, .. } => Some(*status),
            RefOutcome::Cancelled => None,
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = (Ref, &str)> + '_ {
        self.outcomes.iter().filter_map(|(r, outcome)| match outcome {
            RefOutcome::Resolved {
                error_text: Some(text),
                ..
            } => Some((*r, text.as_str())),
            _ => None,
        })
    }

    pub fn cancelled(&self) -> impl Iterator<Item = Ref> + '_ {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| **outcome == RefOutcome::Cancelled)
            .map(|(r, _)| *r)
    }

    pub fn recomputed(&self) -> usize {
        self.outcomes.len()
    }

    /// Every ref that did not end up `ok`, as [`EngineError::TransformFailed`]
    /// or [`EngineError::Cancelled`], in topological order.
    pub fn failures(&self) -> impl Iterator<Item = EngineError> + '_ {
        self.outcomes
            .iter()
            .filter_map(|(&node_ref, outcome)| match outcome {
                RefOutcome::Resolved {
                    error_text: Some(text),
                    ..
                } => Some(EngineError::TransformFailed {
                    node_ref,
                    reason: text.clone(),
                }),
                RefOutcome::Resolved { .. } => None,
                RefOutcome::Cancelled => Some(EngineError::Cancelled(node_ref)),
            })
    }
}

/// A unit of recomputation captured while the writer lock was held.
struct Job {
    node_ref: Ref,
    parent: Ref,
    version: u64,
    params: Params,
    transformer: Option<Arc<TransformerDefinition>>,
    transformer_name: String,
}

enum ParentState {
    Ready(Arc<Cell>),
    Stale,
}

/// Everything the structural phase hands over to execution and publishing.
struct Prepared {
    /// Position of the transaction in tree-swap order; 0 when nothing changed.
    sequence: u64,
    tree: Arc<StateTree>,
    diff: TreeDiff,
    jobs: IndexMap<Ref, Job>,
    removed: Vec<(Ref, Option<Arc<StateObject>>)>,
}

/// What observers have been told so far.
#[derive(Default)]
struct Published {
    /// Sequence of the newest transaction whose tree was announced.
    sequence: u64,
    /// Last announced snapshot per ref.
    cells: HashMap<Ref, Arc<Cell>>,
}

/// Applies transactions to the tree and brings the cell store up to date.
///
/// Structural work runs under a single writer lock; transformer execution runs
/// after the lock is released, so a newer transaction can start while an older
/// one is still computing. The older one then loses every commit race through
/// the version gate of the [`CellStore`].
///
/// Publishing is serialized. A transaction that finishes after a newer one has
/// already announced its tree skips `tree_changed`, and `cell_updated` fires
/// only for cells whose state differs from the last one announced.
pub struct UpdateEngine {
    config: EngineConfig,
    registry: Arc<TransformerRegistry>,
    cells: Arc<CellStore>,
    events: Arc<StateEvents>,
    tree: RwLock<Arc<StateTree>>,
    writer: Mutex<()>,
    sequence: AtomicU64,
    published: StdMutex<Published>,
    reporter: ProgressReporter,
}

impl UpdateEngine {
    pub fn new(
        config: EngineConfig,
        registry: Arc<TransformerRegistry>,
        events: Arc<StateEvents>,
    ) -> Self {
        let cells = Arc::new(CellStore::new(config.dispose_on_replace));
        cells.insert_resolved(Ref::ROOT, StateObject::root());
        Self {
            config,
            registry,
            cells,
            events,
            tree: RwLock::new(Arc::new(StateTree::new())),
            writer: Mutex::new(()),
            sequence: AtomicU64::new(0),
            published: StdMutex::new(Published::default()),
            reporter: ProgressReporter::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TransformerRegistry> {
        &self.registry
    }

    pub fn cells(&self) -> &Arc<CellStore> {
        &self.cells
    }

    pub fn events(&self) -> &Arc<StateEvents> {
        &self.events
    }

    pub fn tree(&self) -> Arc<StateTree> {
        self.tree
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies `tx` and recomputes everything it affects.
    ///
    /// Only validation failures are returned as `Err`; they leave all state as
    /// it was. Transformer failures are recorded in the cells and reported in
    /// the returned outcomes.
    #[instrument(skip_all, name = "transaction", fields(edits = tx.len()))]
    pub async fn apply(&self, tx: &Transaction) -> Result<TransactionResult, EngineError> {
        self.reporter
            .report(Progress::TransactionStart { edits: tx.len() });

        let prepared = self.prepare(tx).await?;
        if prepared.diff.is_empty() {
            debug!("Transaction produced no changes.");
            return Ok(TransactionResult::default());
        }

        info!(
            added = prepared.diff.added.len(),
            removed = prepared.diff.removed.len(),
            affected = prepared.jobs.len(),
            "Tree updated."
        );

        self.reporter.report(Progress::UpdateStart {
            total_refs: prepared.jobs.len() as u64,
        });
        let outcomes = self.execute(&prepared.tree, prepared.jobs).await;
        self.reporter.report(Progress::UpdateFinish);

        let result = TransactionResult {
            diff: prepared.diff,
            outcomes,
        };
        self.publish(
            prepared.sequence,
            &prepared.tree,
            &result,
            prepared.removed,
        );
        Ok(result)
    }

    async fn prepare(&self, tx: &Transaction) -> Result<Prepared, EngineError> {
        let _guard = self.writer.lock().await;

        // 1. Validate and apply edits to a working copy; any failure rejects the batch.
        let registry = self.registry.snapshot();
        let old_tree = self.tree();
        let new_tree = Arc::new(tx.apply_to(&old_tree, &registry)?);
        let diff = TreeDiff::between(&old_tree, &new_tree);
        if diff.is_empty() {
            return Ok(Prepared {
                sequence: 0,
                tree: old_tree,
                diff,
                jobs: IndexMap::new(),
                removed: Vec::new(),
            });
        }

        // 2. Affected set, in the topological order of the new tree.
        let affected = affected_set(&new_tree, &diff);
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        // 3. Swap in the tree and bring the cell set in line with it.
        *self.tree.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&new_tree);

        let mut removed = Vec::with_capacity(diff.removed.len());
        for &r in &diff.removed {
            let object = self.cells.get(r).and_then(|c| c.object.clone());
            self.cells.remove(r);
            removed.push((r, object));
        }
        for &r in &diff.added {
            self.cells.create(r);
        }

        // 4. Invalidate and capture version tokens.
        let mut jobs = IndexMap::with_capacity(affected.len());
        for r in affected {
            let (Some(node), Some(version)) = (new_tree.node(r), self.cells.invalidate(r)) else {
                continue;
            };
            let Some(parent) = node.parent else {
                continue;
            };
            trace!(node_ref = %r, version, "Scheduled for recomputation.");
            jobs.insert(
                r,
                Job {
                    node_ref: r,
                    parent,
                    version,
                    params: node.params.clone(),
                    transformer: registry.get(&node.transformer).cloned(),
                    transformer_name: node.transformer.to_string(),
                },
            );
        }

        Ok(Prepared {
            sequence,
            tree: new_tree,
            diff,
            jobs,
            removed,
        })
    }

    async fn execute(
        &self,
        tree: &StateTree,
        mut jobs: IndexMap<Ref, Job>,
    ) -> IndexMap<Ref, RefOutcome> {
        let order: Vec<Ref> = jobs.keys().copied().collect();
        let mut resolved: HashMap<Ref, RefOutcome> = HashMap::with_capacity(order.len());

        // Refs whose parent is outside the affected set start right away; the
        // rest are released when their parent's computation completes.
        let roots: Vec<Ref> = order
            .iter()
            .copied()
            .filter(|r| jobs.get(r).is_some_and(|j| !jobs.contains_key(&j.parent)))
            .collect();
        let mut ready: VecDeque<Job> =
            roots.iter().filter_map(|r| jobs.shift_remove(r)).collect();

        let limit = self.config.max_concurrent_transforms;
        let mut running: FuturesUnordered<BoxFuture<'_, (Ref, RefOutcome)>> =
            FuturesUnordered::new();

        loop {
            while running.len() < limit {
                let Some(job) = ready.pop_front() else {
                    break;
                };
                running.push(self.resolve(job).boxed());
            }

            let Some((node_ref, outcome)) = running.next().await else {
                break;
            };
            if let RefOutcome::Resolved { status, .. } = &outcome {
                self.reporter.report(Progress::RefResolved {
                    node_ref,
                    status: *status,
                });
            }

            let cancelled = outcome == RefOutcome::Cancelled;
            resolved.insert(node_ref, outcome);
            for child in tree.children(node_ref) {
                let Some(job) = jobs.shift_remove(&child) else {
                    continue;
                };
                if cancelled {
                    for r in tree.descendants(job.node_ref) {
                        if jobs.shift_remove(&r).is_some() || r == job.node_ref {
                            resolved.insert(r, RefOutcome::Cancelled);
                        }
                    }
                } else {
                    ready.push_back(job);
                }
            }
        }

        order
            .into_iter()
            .filter_map(|r| resolved.remove(&r).map(|outcome| (r, outcome)))
            .collect()
    }

    /// Computes one ref: waits for its parent, then commits either the
    /// transformer's result or an inherited error.
    async fn resolve(&self, job: Job) -> (Ref, RefOutcome) {
        let node_ref = job.node_ref;
        let parent = match self.wait_for_parent(&job).await {
            Some(ParentState::Ready(cell)) => cell,
            Some(ParentState::Stale) | None => return (node_ref, RefOutcome::Cancelled),
        };

        let Some(result) = self.compute(&job, &parent).await else {
            return (node_ref, RefOutcome::Cancelled);
        };
        if let Err(error) = &result {
            if !error.is_inherited_by(node_ref) {
                warn!(
                    node_ref = %node_ref,
                    transformer = %job.transformer_name,
                    error = %error.message,
                    "Transform failed."
                );
                self.reporter.report(Progress::Message(format!(
                    "{} ({}): {}",
                    node_ref, job.transformer_name, error.message
                )));
            }
        }

        if !self.cells.commit(node_ref, job.version, result) {
            return (node_ref, RefOutcome::Cancelled);
        }
        match self.cells.get(node_ref) {
            Some(cell) => (
                node_ref,
                RefOutcome::Resolved {
                    status: cell.status,
                    error_text: cell.error_text().map(str::to_string),
                },
            ),
            None => (node_ref, RefOutcome::Cancelled),
        }
    }

    async fn wait_for_parent(&self, job: &Job) -> Option<ParentState> {
        self.cells
            .wait_until(|cells| {
                if !cells.is_current(job.node_ref, job.version) {
                    return Some(ParentState::Stale);
                }
                match cells.get(job.parent) {
                    Some(cell) if cell.status.is_terminal() => Some(ParentState::Ready(cell)),
                    Some(_) => None,
                    None => Some(ParentState::Stale),
                }
            })
            .await
    }

    /// The value to commit for `job`, or `None` if it went stale before the
    /// transformer could start.
    async fn compute(&self, job: &Job, parent: &Cell) -> Option<Result<StateObject, CellError>> {
        let node_ref = job.node_ref;
        if let Some(error) = &parent.error {
            return Some(Err(error.inherit(self.config.inherited_errors)));
        }
        let Some(parent_object) = parent.object.clone() else {
            return Some(Err(CellError::failed(node_ref, "parent has no object")));
        };
        let Some(transformer) = &job.transformer else {
            return Some(Err(CellError::failed(
                node_ref,
                format!("transformer '{}' is not registered", job.transformer_name),
            )));
        };
        if !transformer.accepts(&parent_object.kind) {
            return Some(Err(CellError::failed(
                node_ref,
                format!("{} cannot be applied to {}", transformer.id, parent_object.kind),
            )));
        }

        if !self.cells.mark_processing(node_ref, job.version) {
            return None;
        }
        debug!(
            node_ref = %node_ref,
            transformer = %transformer.id,
            version = job.version,
            "Applying transformer."
        );
        let input = TransformInput {
            parent: parent_object,
            params: job.params.clone(),
            context: TransformContext::new(node_ref, job.version, Arc::clone(&self.cells)),
        };
        let result = transformer
            .apply(input)
            .await
            .map_err(|e| CellError::failed(node_ref, e.reason()));
        Some(result)
    }

    fn publish(
        &self,
        sequence: u64,
        tree: &Arc<StateTree>,
        result: &TransactionResult,
        removed: Vec<(Ref, Option<Arc<StateObject>>)>,
    ) {
        let mut published = self
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if sequence > published.sequence {
            published.sequence = sequence;
            self.events.tree_changed.publish(&TreeChanged {
                tree: Arc::clone(tree),
                diff: Arc::new(result.diff.clone()),
            });
        } else {
            debug!(
                sequence,
                newest = published.sequence,
                "Tree already superseded; skipping tree_changed."
            );
        }

        for (node_ref, object) in removed {
            published.cells.remove(&node_ref);
            self.events
                .object_removed
                .publish(&ObjectRemoved { node_ref, object });
        }

        let mut object_changes = Vec::new();
        for (&node_ref, outcome) in &result.outcomes {
            if *outcome == RefOutcome::Cancelled {
                continue;
            }
            let Some(cell) = self.cells.get(node_ref) else {
                continue;
            };
            let previous = published.cells.insert(node_ref, Arc::clone(&cell));
            if previous.as_ref().is_some_and(|p| p.same_state_as(&cell)) {
                continue;
            }
            self.events.cell_updated.publish(&CellUpdated {
                node_ref,
                cell: Arc::clone(&cell),
            });
            object_changes.push((node_ref, previous.and_then(|p| p.object.clone()), cell));
        }

        for (node_ref, previous, cell) in object_changes {
            let Some(object) = cell.object.clone() else {
                continue;
            };
            match previous {
                Some(previous) if Arc::ptr_eq(&previous, &object) => {}
                Some(previous) => self.events.object_updated.publish(&ObjectUpdated {
                    node_ref,
                    previous,
                    object,
                }),
                None => self
                    .events
                    .object_created
                    .publish(&ObjectCreated { node_ref, object }),
            }
        }
    }
}

impl std::fmt::Debug for UpdateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateEngine")
            .field("config", &self.config)
            .field("cells", &self.cells.len())
            .finish_non_exhaustive()
    }
}

/// `added ∪ reparented ∪ params_changed`, closed over descendants, in pre-order.
fn affected_set(tree: &StateTree, diff: &TreeDiff) -> IndexSet<Ref> {
    let dirty: IndexSet<Ref> = diff.dirty().collect();
    if dirty.is_empty() {
        return IndexSet::new();
    }
    let mut affected = IndexSet::new();
    let mut inherited: IndexSet<Ref> = IndexSet::new();
    for node in tree.iter() {
        let r = node.node_ref;
        let parent_affected = node.parent.is_some_and(|p| inherited.contains(&p));
        if dirty.contains(&r) || parent_affected {
            affected.insert(r);
            inherited.insert(r);
        }
    }
    affected
}
