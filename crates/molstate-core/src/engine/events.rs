use super::cell::Cell;
use crate::core::models::ids::Ref;
use crate::core::models::object::StateObject;
use crate::core::tree::{StateTree, TreeDiff};
use slotmap::{SlotMap, new_key_type};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

new_key_type! {
    /// Key of one handler inside a [`Subject`].
    pub struct SubscriptionKey;
}

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Handlers<T> {
    next_seq: u64,
    entries: SlotMap<SubscriptionKey, (u64, Handler<T>)>,
}

type SharedHandlers<T> = Mutex<Handlers<T>>;

/// A typed, synchronous broadcast channel.
///
/// `publish` delivers to the handlers registered when it was called, in
/// subscription order. Handlers may subscribe or unsubscribe (themselves
/// included) while being called; such changes apply from the next publish.
pub struct Subject<T> {
    handlers: Arc<SharedHandlers<T>>,
}

impl<T> Subject<T> {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(Handlers {
                next_seq: 0,
                entries: SlotMap::with_key(),
            })),
        }
    }

    pub fn subscribe(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> Subscription
    where
        T: 'static,
    {
        let key = {
            let mut handlers = lock(&self.handlers);
            let seq = handlers.next_seq;
            handlers.next_seq += 1;
            handlers.entries.insert((seq, Arc::new(handler)))
        };
        let weak: Weak<SharedHandlers<T>> = Arc::downgrade(&self.handlers);
        Subscription {
            key,
            detach: Some(Box::new(move |key| {
                if let Some(handlers) = weak.upgrade() {
                    lock(&handlers).entries.remove(key);
                }
            })),
        }
    }

    pub fn publish(&self, event: &T) {
        // Slot reuse breaks insertion order, so sort by sequence number.
        let mut snapshot: Vec<(u64, Handler<T>)> = lock(&self.handlers)
            .entries
            .values()
            .map(|(seq, h)| (*seq, Arc::clone(h)))
            .collect();
        snapshot.sort_by_key(|(seq, _)| *seq);
        for (_, handler) in snapshot {
            handler(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.handlers).entries.len()
    }
}

impl<T> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

fn lock<T>(handlers: &SharedHandlers<T>) -> MutexGuard<'_, Handlers<T>> {
    handlers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle returned by [`Subject::subscribe`]. Dropping it keeps the handler
/// registered; call [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    key: SubscriptionKey,
    detach: Option<Box<dyn FnOnce(SubscriptionKey) + Send + Sync>>,
}

impl Subscription {
    pub fn key(&self) -> SubscriptionKey {
        self.key
    }

    /// Removes the handler. Calling this more than once is a no-op, as is
    /// calling it after the subject was dropped.
    pub fn unsubscribe(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach(self.key);
        }
    }

    pub fn is_active(&self) -> bool {
        self.detach.is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct TreeChanged {
    pub tree: Arc<StateTree>,
    pub diff: Arc<TreeDiff>,
}

#[derive(Debug, Clone)]
pub struct CellUpdated {
    pub node_ref: Ref,
    pub cell: Arc<Cell>,
}

#[derive(Debug, Clone)]
pub struct ObjectCreated {
    pub node_ref: Ref,
    pub object: Arc<StateObject>,
}

#[derive(Debug, Clone)]
pub struct ObjectUpdated {
    pub node_ref: Ref,
    pub previous: Arc<StateObject>,
    pub object: Arc<StateObject>,
}

#[derive(Debug, Clone)]
pub struct ObjectRemoved {
    pub node_ref: Ref,
    /// The object the cell held when the node was removed, already disposed.
    pub object: Option<Arc<StateObject>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentChanged {
    pub previous: Ref,
    pub current: Ref,
}

/// Every channel a session publishes on.
#[derive(Debug, Default)]
pub struct StateEvents {
    pub tree_changed: Subject<TreeChanged>,
    pub cell_updated: Subject<CellUpdated>,
    pub object_created: Subject<ObjectCreated>,
    pub object_updated: Subject<ObjectUpdated>,
    pub object_removed: Subject<ObjectRemoved>,
    pub current_changed: Subject<CurrentChanged>,
    pub is_busy: Subject<bool>,
}

impl StateEvents {
    pub fn new() -> Self {
        Self::default()
    }
}
