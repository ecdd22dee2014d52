use super::config::InheritedErrors;
use crate::core::models::ids::Ref;
use crate::core::models::object::StateObject;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::watch;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellStatus {
    Pending,
    Processing,
    Ok,
    Error,
}

impl CellStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CellStatus::Ok | CellStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CellStatus::Pending => "pending",
            CellStatus::Processing => "processing",
            CellStatus::Ok => "ok",
            CellStatus::Error => "error",
        }
    }
}

impl fmt::Display for CellStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a cell is in the `error` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellError {
    /// The text shown to users.
    pub text: String,
    /// The message of the original failure.
    pub message: String,
    /// The ref whose transformer actually failed.
    pub origin: Ref,
}

impl CellError {
    pub fn failed(origin: Ref, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            text: message.clone(),
            message,
            origin,
        }
    }

    /// The error of a descendant of the node that failed with `self`.
    pub fn inherit(&self, mode: InheritedErrors) -> Self {
        Self {
            text: mode.format(self.origin, &self.message),
            message: self.message.clone(),
            origin: self.origin,
        }
    }

    pub fn is_inherited_by(&self, node_ref: Ref) -> bool {
        self.origin != node_ref
    }
}

/// Immutable snapshot of the runtime record of one node.
///
/// The store replaces a cell wholesale on every change, so a reader holding an
/// `Arc<Cell>` always sees a consistent `(status, object, error, version)` tuple.
#[derive(Debug, Clone)]
pub struct Cell {
    pub node_ref: Ref,
    pub status: CellStatus,
    pub object: Option<Arc<StateObject>>,
    pub error: Option<CellError>,
    pub version: u64,
}

impl Cell {
    fn pending(node_ref: Ref) -> Self {
        Self {
            node_ref,
            status: CellStatus::Pending,
            object: None,
            error: None,
            version: 0,
        }
    }

    pub fn error_text(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.text.as_str())
    }

    /// Whether two snapshots differ in what an observer can see: status, object
    /// identity, or error. Versions are ignored.
    pub fn same_state_as(&self, other: &Cell) -> bool {
        let same_object = match (&self.object, &other.object) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        self.status == other.status && same_object && self.error == other.error
    }
}

/// Mapping from ref to [`Cell`], with version-gated commits.
///
/// A result is applied only if it carries the version the cell had when its
/// computation was started; anything else is discarded and its resource
/// disposed, so a superseded computation can never overwrite a newer one.
///
/// A resource is disposed only once no live cell holds an object sharing it.
/// With `dispose_on_replace` off, displaced objects stay retained under their
/// ref and are disposed together with the cell on [`CellStore::remove`].
pub struct CellStore {
    cells: RwLock<HashMap<Ref, Arc<Cell>>>,
    retained: Mutex<HashMap<Ref, Vec<Arc<StateObject>>>>,
    generation: watch::Sender<u64>,
    dispose_on_replace: bool,
}

impl CellStore {
    pub fn new(dispose_on_replace: bool) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            cells: RwLock::new(HashMap::new()),
            retained: Mutex::new(HashMap::new()),
            generation,
            dispose_on_replace,
        }
    }

    pub fn get(&self, node_ref: Ref) -> Option<Arc<Cell>> {
        self.read().get(&node_ref).cloned()
    }

    pub fn snapshot(&self) -> HashMap<Ref, Arc<Cell>> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn contains(&self, node_ref: Ref) -> bool {
        self.read().contains_key(&node_ref)
    }

    pub fn current_version(&self, node_ref: Ref) -> Option<u64> {
        self.read().get(&node_ref).map(|c| c.version)
    }

    pub fn is_current(&self, node_ref: Ref, version: u64) -> bool {
        self.current_version(node_ref) == Some(version)
    }

    /// Number of displaced objects kept alive for `node_ref`.
    pub fn retained_count(&self, node_ref: Ref) -> usize {
        self.retained().get(&node_ref).map_or(0, Vec::len)
    }

    /// Creates a pending cell at version 0. Existing cells are left untouched.
    pub fn create(&self, node_ref: Ref) {
        let mut cells = self.write();
        cells
            .entry(node_ref)
            .or_insert_with(|| Arc::new(Cell::pending(node_ref)));
        drop(cells);
        self.bump();
    }

    /// Creates (or replaces) a cell that is already resolved, as the root cell is.
    pub fn insert_resolved(&self, node_ref: Ref, object: StateObject) {
        let cell = Cell {
            node_ref,
            status: CellStatus::Ok,
            object: Some(Arc::new(object)),
            error: None,
            version: 0,
        };
        let mut cells = self.write();
        let previous = cells.insert(node_ref, Arc::new(cell));
        let released = previous
            .and_then(|c| c.object.clone())
            .and_then(|obj| self.release(&cells, node_ref, obj));
        drop(cells);
        if let Some(obj) = released {
            obj.dispose();
        }
        self.bump();
    }

    /// Starts a new computation for `node_ref`: bumps the version, marks the cell
    /// pending and clears its error. Returns the version the computation must
    /// present to commit.
    pub fn invalidate(&self, node_ref: Ref) -> Option<u64> {
        let mut cells = self.write();
        let cell = cells.get_mut(&node_ref)?;
        let next = Cell {
            node_ref,
            status: CellStatus::Pending,
            object: cell.object.clone(),
            error: None,
            version: cell.version + 1,
        };
        let version = next.version;
        *cell = Arc::new(next);
        drop(cells);
        trace!(node_ref = %node_ref, version, "Cell invalidated.");
        self.bump();
        Some(version)
    }

    pub fn mark_processing(&self, node_ref: Ref, version: u64) -> bool {
        let mut cells = self.write();
        let Some(cell) = cells.get_mut(&node_ref) else {
            return false;
        };
        if cell.version != version {
            return false;
        }
        let mut next = Cell::clone(cell);
        next.status = CellStatus::Processing;
        *cell = Arc::new(next);
        drop(cells);
        self.bump();
        true
    }

    /// Applies the outcome of the computation started at `version`.
    ///
    /// Returns `false` when the cell was invalidated again or removed in the
    /// meantime; the result is then discarded and its resource disposed.
    pub fn commit(
        &self,
        node_ref: Ref,
        version: u64,
        result: Result<StateObject, CellError>,
    ) -> bool {
        let mut cells = self.write();
        let current = cells.get(&node_ref).cloned();

        let Some(cell) = current.filter(|c| c.version == version) else {
            let in_use = result
                .as_ref()
                .is_ok_and(|obj| self.resource_in_use(&cells, obj));
            drop(cells);
            debug!(node_ref = %node_ref, version, "Discarding stale result.");
            if let Ok(obj) = result {
                if !in_use {
                    obj.dispose();
                }
            }
            return false;
        };

        let previous = cell.object.clone();
        let next = match result {
            Ok(obj) => Cell {
                node_ref,
                status: CellStatus::Ok,
                object: Some(Arc::new(obj)),
                error: None,
                version,
            },
            Err(error) => Cell {
                node_ref,
                status: CellStatus::Error,
                object: None,
                error: Some(error),
                version,
            },
        };
        cells.insert(node_ref, Arc::new(next));
        let released = previous.and_then(|prev| self.release(&cells, node_ref, prev));
        drop(cells);

        if let Some(prev) = released {
            prev.dispose();
        }
        self.bump();
        true
    }

    /// Drops the cell and disposes the resources of the object it held and of
    /// everything retained for it, unless another live cell still shares them.
    pub fn remove(&self, node_ref: Ref) -> bool {
        let mut cells = self.write();
        let Some(cell) = cells.remove(&node_ref) else {
            return false;
        };
        let mut held = self.retained().remove(&node_ref).unwrap_or_default();
        held.extend(cell.object.clone());
        let released: Vec<_> = held
            .into_iter()
            .filter(|obj| !self.resource_in_use(&cells, obj))
            .collect();
        drop(cells);

        for obj in released {
            obj.dispose();
        }
        self.bump();
        true
    }

    /// Resolves once the cell is terminal (or gone). Wakes on every store change.
    pub async fn wait_for_terminal(&self, node_ref: Ref) -> Option<Arc<Cell>> {
        self.wait_until(|cells| match cells.get(node_ref) {
            Some(cell) if !cell.status.is_terminal() => None,
            other => Some(other),
        })
        .await
        .flatten()
    }

    /// Re-evaluates `check` after every store change until it yields a value.
    pub(crate) async fn wait_until<T>(
        &self,
        mut check: impl FnMut(&Self) -> Option<T>,
    ) -> Option<T> {
        let mut changes = self.generation.subscribe();
        loop {
            if let Some(value) = check(self) {
                return Some(value);
            }
            if changes.changed().await.is_err() {
                return check(self);
            }
        }
    }

    /// Decides what happens to an object displaced from `node_ref`. Returns it
    /// when its resource should be disposed now.
    fn release(
        &self,
        cells: &HashMap<Ref, Arc<Cell>>,
        node_ref: Ref,
        object: Arc<StateObject>,
    ) -> Option<Arc<StateObject>> {
        if object.resource().is_none() || self.resource_in_use(cells, &object) {
            return None;
        }
        if self.dispose_on_replace {
            return Some(object);
        }
        trace!(node_ref = %node_ref, "Retaining displaced object.");
        self.retained().entry(node_ref).or_default().push(object);
        None
    }

    /// Whether a live cell or a retained object still shares the resource of
    /// `object`. Callers hold the cell lock.
    fn resource_in_use(&self, cells: &HashMap<Ref, Arc<Cell>>, object: &StateObject) -> bool {
        if object.resource().is_none() {
            return false;
        }
        let retained = self.retained();
        cells
            .values()
            .filter_map(|cell| cell.object.as_deref())
            .chain(retained.values().flatten().map(Arc::as_ref))
            .any(|held| held.shares_resource_with(object))
    }

    fn bump(&self) {
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Ref, Arc<Cell>>> {
        self.cells.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Ref, Arc<Cell>>> {
        self.cells.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Always taken after the cell lock when both are needed.
    fn retained(&self) -> MutexGuard<'_, HashMap<Ref, Vec<Arc<StateObject>>>> {
        self.retained.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CellStore {
    fn default() -> Self {
        Self::new(true)
    }
}

impl fmt::Debug for CellStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellStore")
            .field("cells", &self.len())
            .field("dispose_on_replace", &self.dispose_on_replace)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::object::{Disposable, ObjectKind, Resource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Buffer(Arc<AtomicUsize>);

    impl Disposable for Buffer {
        fn dispose(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn number(v: f64) -> StateObject {
        StateObject::new(ObjectKind::new("number"), v.to_string(), v)
    }

    fn mesh(count: &Arc<AtomicUsize>) -> StateObject {
        StateObject::new(ObjectKind::new("mesh"), "Mesh", ())
            .with_resource(Resource::new(Buffer(count.clone())))
    }

    fn store_with(node_ref: Ref) -> CellStore {
        let store = CellStore::default();
        store.create(node_ref);
        store
    }

    mod versioning {
        use super::*;

        #[test]
        fn invalidate_bumps_version_and_resets_status() {
            let r = Ref::new();
            let store = store_with(r);
            let v1 = store.invalidate(r).unwrap();
            assert!(store.commit(r, v1, Err(CellError::failed(r, "boom"))));
            let v2 = store.invalidate(r).unwrap();

            assert_eq!(v2, v1 + 1);
            let cell = store.get(r).unwrap();
            assert_eq!(cell.status, CellStatus::Pending);
            assert!(cell.error.is_none());
        }

        #[test]
        fn invalidate_of_unknown_ref_returns_none() {
            let store = CellStore::default();
            assert_eq!(store.invalidate(Ref::new()), None);
        }

        #[test]
        fn commit_with_current_version_applies_the_result() {
            let r = Ref::new();
            let store = store_with(r);
            let v = store.invalidate(r).unwrap();
            assert!(store.mark_processing(r, v));
            assert_eq!(store.get(r).unwrap().status, CellStatus::Processing);

            assert!(store.commit(r, v, Ok(number(10.0))));
            let cell = store.get(r).unwrap();
            assert_eq!(cell.status, CellStatus::Ok);
            assert_eq!(cell.object.as_ref().unwrap().data::<f64>(), Some(&10.0));
        }

        #[test]
        fn stale_commit_is_rejected_and_later_result_survives() {
            let r = Ref::new();
            let store = store_with(r);
            let v1 = store.invalidate(r).unwrap();
            let v2 = store.invalidate(r).unwrap();

            assert!(store.commit(r, v2, Ok(number(2.0))));
            assert!(!store.commit(r, v1, Ok(number(1.0))));

            let cell = store.get(r).unwrap();
            assert_eq!(cell.version, v2);
            assert_eq!(cell.object.as_ref().unwrap().data::<f64>(), Some(&2.0));
        }

        #[test]
        fn error_commit_drops_the_previous_object() {
            let r = Ref::new();
            let store = store_with(r);
            let v = store.invalidate(r).unwrap();
            store.commit(r, v, Ok(number(1.0)));
            let v = store.invalidate(r).unwrap();
            assert!(store.get(r).unwrap().object.is_some());

            store.commit(r, v, Err(CellError::failed(r, "divide by zero")));
            let cell = store.get(r).unwrap();
            assert_eq!(cell.status, CellStatus::Error);
            assert!(cell.object.is_none());
            assert_eq!(cell.error_text(), Some("divide by zero"));
        }
    }

    mod disposal {
        use super::*;

        #[test]
        fn remove_disposes_held_object_exactly_once() {
            let count = Arc::new(AtomicUsize::new(0));
            let r = Ref::new();
            let store = store_with(r);
            let v = store.invalidate(r).unwrap();
            store.commit(r, v, Ok(mesh(&count)));

            assert!(store.remove(r));
            assert!(!store.remove(r));
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn invalidate_then_remove_then_late_commit_disposes_each_object_once() {
            let old_count = Arc::new(AtomicUsize::new(0));
            let late_count = Arc::new(AtomicUsize::new(0));
            let r = Ref::new();
            let store = store_with(r);
            let v1 = store.invalidate(r).unwrap();
            store.commit(r, v1, Ok(mesh(&old_count)));

            let v2 = store.invalidate(r).unwrap();
            store.remove(r);
            assert!(!store.commit(r, v2, Ok(mesh(&late_count))));

            assert_eq!(old_count.load(Ordering::SeqCst), 1);
            assert_eq!(late_count.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn replacing_an_object_disposes_the_previous_one() {
            let first = Arc::new(AtomicUsize::new(0));
            let second = Arc::new(AtomicUsize::new(0));
            let r = Ref::new();
            let store = store_with(r);
            let v = store.invalidate(r).unwrap();
            store.commit(r, v, Ok(mesh(&first)));
            let v = store.invalidate(r).unwrap();
            store.commit(r, v, Ok(mesh(&second)));

            assert_eq!(first.load(Ordering::SeqCst), 1);
            assert_eq!(second.load(Ordering::SeqCst), 0);
        }

        #[test]
        fn replacement_keeping_the_same_resource_does_not_dispose_it() {
            let count = Arc::new(AtomicUsize::new(0));
            let resource = Resource::new(Buffer(count.clone()));
            let r = Ref::new();
            let store = store_with(r);
            let v = store.invalidate(r).unwrap();
            store.commit(
                r,
                v,
                Ok(StateObject::new(ObjectKind::new("mesh"), "v1", ())
                    .with_resource(resource.clone())),
            );
            let v = store.invalidate(r).unwrap();
            store.commit(
                r,
                v,
                Ok(StateObject::new(ObjectKind::new("mesh"), "v2", ()).with_resource(resource)),
            );
            assert_eq!(count.load(Ordering::SeqCst), 0);
        }

        #[test]
        fn disabled_dispose_on_replace_retains_until_removal() {
            let first = Arc::new(AtomicUsize::new(0));
            let second = Arc::new(AtomicUsize::new(0));
            let r = Ref::new();
            let store = CellStore::new(false);
            store.create(r);
            let v = store.invalidate(r).unwrap();
            store.commit(r, v, Ok(mesh(&first)));
            let v = store.invalidate(r).unwrap();
            store.commit(r, v, Ok(mesh(&second)));

            assert_eq!(first.load(Ordering::SeqCst), 0);
            assert_eq!(store.retained_count(r), 1);

            assert!(store.remove(r));
            assert_eq!(first.load(Ordering::SeqCst), 1);
            assert_eq!(second.load(Ordering::SeqCst), 1);
            assert_eq!(store.retained_count(r), 0);
        }

        #[test]
        fn disabled_dispose_on_replace_still_disposes_after_error_commit_and_removal() {
            let count = Arc::new(AtomicUsize::new(0));
            let r = Ref::new();
            let store = CellStore::new(false);
            store.create(r);
            let v = store.invalidate(r).unwrap();
            store.commit(r, v, Ok(mesh(&count)));
            let v = store.invalidate(r).unwrap();
            store.commit(r, v, Err(CellError::failed(r, "boom")));
            assert_eq!(count.load(Ordering::SeqCst), 0);

            store.remove(r);
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn removing_a_pass_through_child_keeps_the_parent_resource() {
            let count = Arc::new(AtomicUsize::new(0));
            let (parent, child) = (Ref::new(), Ref::new());
            let store = CellStore::default();
            store.create(parent);
            store.create(child);
            let v = store.invalidate(parent).unwrap();
            store.commit(parent, v, Ok(mesh(&count)));
            let shared = store.get(parent).unwrap().object.clone().unwrap();
            let v = store.invalidate(child).unwrap();
            store.commit(child, v, Ok(StateObject::clone(&shared)));

            assert!(store.remove(child));
            assert_eq!(count.load(Ordering::SeqCst), 0);
            assert!(!shared.resource().unwrap().is_disposed());

            assert!(store.remove(parent));
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn replacing_a_pass_through_child_keeps_the_parent_resource() {
            let count = Arc::new(AtomicUsize::new(0));
            let (parent, child) = (Ref::new(), Ref::new());
            let store = CellStore::default();
            store.create(parent);
            store.create(child);
            let v = store.invalidate(parent).unwrap();
            store.commit(parent, v, Ok(mesh(&count)));
            let shared = store.get(parent).unwrap().object.clone().unwrap();
            let v = store.invalidate(child).unwrap();
            store.commit(child, v, Ok(StateObject::clone(&shared)));

            let v = store.invalidate(child).unwrap();
            store.commit(child, v, Err(CellError::failed(child, "boom")));
            assert_eq!(count.load(Ordering::SeqCst), 0);
        }

        #[test]
        fn removing_the_parent_first_defers_disposal_to_the_last_holder() {
            let count = Arc::new(AtomicUsize::new(0));
            let (parent, child) = (Ref::new(), Ref::new());
            let store = CellStore::default();
            store.create(parent);
            store.create(child);
            let v = store.invalidate(parent).unwrap();
            store.commit(parent, v, Ok(mesh(&count)));
            let shared = store.get(parent).unwrap().object.clone().unwrap();
            let v = store.invalidate(child).unwrap();
            store.commit(child, v, Ok(StateObject::clone(&shared)));

            store.remove(parent);
            assert_eq!(count.load(Ordering::SeqCst), 0);
            store.remove(child);
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn wait_for_terminal_wakes_on_commit() {
        let r = Ref::new();
        let store = Arc::new(store_with(r));
        let v = store.invalidate(r).unwrap();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.wait_for_terminal(r).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.commit(r, v, Ok(number(3.0)));

        let cell = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(cell.status, CellStatus::Ok);
    }

    #[test]
    fn same_state_as_compares_object_identity() {
        let r = Ref::new();
        let store = store_with(r);
        let v = store.invalidate(r).unwrap();
        store.commit(r, v, Ok(number(1.0)));
        let before = store.get(r).unwrap();
        let v = store.invalidate(r).unwrap();
        store.commit(r, v, Ok(number(1.0)));
        let after = store.get(r).unwrap();

        assert!(before.same_state_as(&before.as_ref().clone()));
        assert!(!before.same_state_as(&after));
    }
}
