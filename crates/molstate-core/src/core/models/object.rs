use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// The type tag of a [`StateObject`], used by transformers to decide
/// whether they can be applied to a parent's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKind(Cow<'static, str>);

impl ObjectKind {
    pub const ROOT: ObjectKind = ObjectKind::from_static("root");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An external resource held by a state object, such as a GPU buffer owned by a
/// rendering collaborator.
pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

struct ResourceSlot {
    handle: Box<dyn Disposable>,
    disposed: AtomicBool,
}

/// Shared handle to a [`Disposable`] that runs its disposal at most once, no
/// matter how many clones of the handle (or of the owning object) exist.
#[derive(Clone)]
pub struct Resource {
    slot: Arc<ResourceSlot>,
}

impl Resource {
    pub fn new(handle: impl Disposable + 'static) -> Self {
        Self {
            slot: Arc::new(ResourceSlot {
                handle: Box::new(handle),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Disposes the resource. Returns `true` only for the call that actually
    /// performed the disposal.
    pub fn dispose(&self) -> bool {
        if self.slot.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.slot.handle.dispose();
        true
    }

    pub fn is_disposed(&self) -> bool {
        self.slot.disposed.load(Ordering::Acquire)
    }

    pub fn same_as(&self, other: &Resource) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// An immutable value produced by a transformer.
///
/// The `data` payload is opaque to the graph; consumers downcast it with
/// [`StateObject::data`]. Objects are shared as `Arc<StateObject>` and must never
/// be mutated once committed to a cell.
#[derive(Clone)]
pub struct StateObject {
    pub kind: ObjectKind,
    pub label: String,
    pub description: Option<String>,
    data: Arc<dyn Any + Send + Sync>,
    resource: Option<Resource>,
}

impl StateObject {
    pub fn new<T>(kind: ObjectKind, label: impl Into<String>, data: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            kind,
            label: label.into(),
            description: None,
            data: Arc::new(data),
            resource: None,
        }
    }

    /// The object held by the root cell.
    pub fn root() -> Self {
        Self::new(ObjectKind::ROOT, "Root", ())
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }

    pub fn resource(&self) -> Option<&Resource> {
        self.resource.as_ref()
    }

    /// Whether both objects hold the very same external resource.
    pub fn shares_resource_with(&self, other: &StateObject) -> bool {
        match (&self.resource, &other.resource) {
            (Some(a), Some(b)) => a.same_as(b),
            _ => false,
        }
    }

    /// Disposes the attached resource, if any. Idempotent.
    pub fn dispose(&self) -> bool {
        self.resource.as_ref().is_some_and(Resource::dispose)
    }
}

impl fmt::Debug for StateObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateObject")
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("description", &self.description)
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingBuffer(Arc<AtomicUsize>);

    impl Disposable for CountingBuffer {
        fn dispose(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn data_downcasts_to_the_stored_type_only() {
        let obj = StateObject::new(ObjectKind::new("number"), "10", 10.0_f64);
        assert_eq!(obj.data::<f64>(), Some(&10.0));
        assert!(obj.data::<String>().is_none());
    }

    #[test]
    fn resource_is_disposed_once_across_clones() {
        let count = Arc::new(AtomicUsize::new(0));
        let obj = StateObject::new(ObjectKind::new("mesh"), "Mesh", ())
            .with_resource(Resource::new(CountingBuffer(count.clone())));
        let copy = obj.clone();

        assert!(obj.dispose());
        assert!(!copy.dispose());
        assert!(!obj.dispose());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shares_resource_with_detects_identity_not_equality() {
        let count = Arc::new(AtomicUsize::new(0));
        let resource = Resource::new(CountingBuffer(count.clone()));
        let a = StateObject::new(ObjectKind::new("mesh"), "A", ()).with_resource(resource.clone());
        let b = StateObject::new(ObjectKind::new("mesh"), "B", ()).with_resource(resource);
        let c = StateObject::new(ObjectKind::new("mesh"), "C", ())
            .with_resource(Resource::new(CountingBuffer(count)));

        assert!(a.shares_resource_with(&b));
        assert!(!a.shares_resource_with(&c));
    }

    #[test]
    fn objects_without_resource_report_no_disposal() {
        let obj = StateObject::root();
        assert!(!obj.dispose());
        assert_eq!(obj.kind, ObjectKind::ROOT);
    }
}
