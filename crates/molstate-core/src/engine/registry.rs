use super::context::TransformInput;
use crate::core::models::ids::TransformerId;
use crate::core::models::object::{ObjectKind, StateObject};
use crate::core::models::params::ParamSchema;
use crate::core::tree::ROOT_TRANSFORMER;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("{0}")]
    Failed(String),
}

impl TransformError {
    pub fn failed(reason: impl Into<String>) -> Self {
        TransformError::Failed(reason.into())
    }

    pub fn reason(&self) -> &str {
        match self {
            TransformError::Failed(reason) => reason,
        }
    }
}

pub type TransformResult = Result<StateObject, TransformError>;

type SyncApply = dyn Fn(&TransformInput) -> TransformResult + Send + Sync;
type AsyncApply = dyn Fn(TransformInput) -> BoxFuture<'static, TransformResult> + Send + Sync;
type KindPredicate = dyn Fn(&ObjectKind) -> bool + Send + Sync;

#[derive(Clone)]
enum ApplyFn {
    Sync(Arc<SyncApply>),
    Async(Arc<AsyncApply>),
}

#[derive(Clone)]
enum Acceptance {
    Any,
    Kinds(Vec<ObjectKind>),
    Predicate(Arc<KindPredicate>),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Transformer '{0}' is already registered")]
    DuplicateTransformer(TransformerId),

    #[error("Transformer '{0}' has no apply function")]
    MissingApply(TransformerId),
}

/// The closed capability set of one transformer: what it accepts, which
/// parameters it takes, and how it computes its output.
#[derive(Clone)]
pub struct TransformerDefinition {
    pub id: TransformerId,
    pub display_name: String,
    pub description: Option<String>,
    pub param_schema: ParamSchema,
    accepts: Acceptance,
    apply: ApplyFn,
}

impl TransformerDefinition {
    pub fn builder(id: impl Into<TransformerId>) -> TransformerDefinitionBuilder {
        TransformerDefinitionBuilder::new(id.into())
    }

    pub fn accepts(&self, kind: &ObjectKind) -> bool {
        match &self.accepts {
            Acceptance::Any => true,
            Acceptance::Kinds(kinds) => kinds.contains(kind),
            Acceptance::Predicate(predicate) => predicate(kind),
        }
    }

    /// The explicit list of accepted kinds, when the transformer declared one.
    pub fn accepted_kinds(&self) -> Option<&[ObjectKind]> {
        match &self.accepts {
            Acceptance::Kinds(kinds) => Some(kinds),
            _ => None,
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self.apply, ApplyFn::Async(_))
    }

    /// Runs the transformer. Synchronous transformers complete without yielding.
    pub async fn apply(&self, input: TransformInput) -> TransformResult {
        match &self.apply {
            ApplyFn::Sync(f) => f(&input),
            ApplyFn::Async(f) => f(input).await,
        }
    }
}

impl fmt::Debug for TransformerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformerDefinition")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("is_async", &self.is_async())
            .finish_non_exhaustive()
    }
}

pub struct TransformerDefinitionBuilder {
    id: TransformerId,
    display_name: Option<String>,
    description: Option<String>,
    param_schema: ParamSchema,
    accepts: Acceptance,
    apply: Option<ApplyFn>,
}

impl TransformerDefinitionBuilder {
    fn new(id: TransformerId) -> Self {
        Self {
            id,
            display_name: None,
            description: None,
            param_schema: ParamSchema::new(),
            accepts: Acceptance::Any,
            apply: None,
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
    pub fn params(mut self, schema: ParamSchema) -> Self {
        self.param_schema = schema;
        self
    }
    pub fn from_kinds(mut self, kinds: &[ObjectKind]) -> Self {
        self.accepts = Acceptance::Kinds(kinds.to_vec());
        self
    }
    pub fn accepts_when(
        mut self,
        predicate: impl Fn(&ObjectKind) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.accepts = Acceptance::Predicate(Arc::new(predicate));
        self
    }
    pub fn apply(
        mut self,
        f: impl Fn(&TransformInput) -> TransformResult + Send + Sync + 'static,
    ) -> Self {
        self.apply = Some(ApplyFn::Sync(Arc::new(f)));
        self
    }
    pub fn apply_async<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(TransformInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TransformResult> + Send + 'static,
    {
        self.apply = Some(ApplyFn::Async(Arc::new(move |input| f(input).boxed())));
        self
    }

    pub fn build(self) -> Result<TransformerDefinition, RegistryError> {
        let apply = self
            .apply
            .ok_or_else(|| RegistryError::MissingApply(self.id.clone()))?;
        Ok(TransformerDefinition {
            display_name: self
                .display_name
                .unwrap_or_else(|| self.id.as_str().to_string()),
            id: self.id,
            description: self.description,
            param_schema: self.param_schema,
            accepts: self.accepts,
            apply,
        })
    }
}

/// An immutable view of the registry, taken once per transaction.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    entries: Arc<HashMap<TransformerId, Arc<TransformerDefinition>>>,
}

impl RegistrySnapshot {
    pub fn get(&self, id: &TransformerId) -> Option<&Arc<TransformerDefinition>> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &TransformerId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Definitions sorted by id.
    pub fn definitions(&self) -> Vec<Arc<TransformerDefinition>> {
        let mut defs: Vec<_> = self.entries.values().cloned().collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }
}

/// Catalog of transformers keyed by id.
///
/// Registration is copy-on-write: a transaction works against the snapshot it
/// took when it started, so registering a transformer never races with work
/// already in flight.
#[derive(Debug)]
pub struct TransformerRegistry {
    current: RwLock<RegistrySnapshot>,
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformerRegistry {
    /// Creates a registry holding only the built-in root transformer.
    pub fn new() -> Self {
        let root = TransformerDefinition::builder(ROOT_TRANSFORMER)
            .display_name("Root")
            .from_kinds(&[])
            .apply(|_| Ok(StateObject::root()))
            .build()
            .map(Arc::new);
        let mut entries = HashMap::new();
        if let Ok(root) = root {
            entries.insert(ROOT_TRANSFORMER, root);
        }
        Self {
            current: RwLock::new(RegistrySnapshot {
                entries: Arc::new(entries),
            }),
        }
    }

    pub fn register(&self, definition: TransformerDefinition) -> Result<(), RegistryError> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.contains(&definition.id) {
            return Err(RegistryError::DuplicateTransformer(definition.id));
        }
        debug!(
            transformer = %definition.id,
            is_async = definition.is_async(),
            "Registering transformer."
        );
        let mut entries = HashMap::clone(&current.entries);
        entries.insert(definition.id.clone(), Arc::new(definition));
        current.entries = Arc::new(entries);
        Ok(())
    }

    pub fn get(&self, id: &TransformerId) -> Option<Arc<TransformerDefinition>> {
        self.snapshot().get(id).cloned()
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<TransformerId> {
        let mut ids: Vec<_> = self.snapshot().entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ids::Ref;
    use crate::core::models::params::{ParamDefinition, Params};
    use crate::engine::cell::CellStore;
    use crate::engine::context::TransformContext;

    fn number_kind() -> ObjectKind {
        ObjectKind::new("number")
    }

    fn input(value: f64, params: Params) -> TransformInput {
        let cells = Arc::new(CellStore::default());
        TransformInput {
            parent: Arc::new(StateObject::new(number_kind(), "in", value)),
            params,
            context: TransformContext::new(Ref::new(), 1, cells),
        }
    }

    fn double() -> TransformerDefinition {
        TransformerDefinition::builder("number.double")
            .from_kinds(&[number_kind()])
            .apply(|input| {
                let v = input.parent.data::<f64>().copied().unwrap_or_default();
                Ok(StateObject::new(ObjectKind::new("number"), "doubled", v * 2.0))
            })
            .build()
            .unwrap()
    }

    #[test]
    fn builder_requires_an_apply_function() {
        let err = TransformerDefinition::builder("broken").build().unwrap_err();
        assert_eq!(err, RegistryError::MissingApply("broken".into()));
    }

    #[test]
    fn builder_defaults_display_name_to_id() {
        assert_eq!(double().display_name, "number.double");
        assert!(!double().is_async());
    }

    #[test]
    fn accepts_honours_declared_kinds_and_predicates() {
        let def = double();
        assert!(def.accepts(&number_kind()));
        assert!(!def.accepts(&ObjectKind::ROOT));
        assert_eq!(def.accepted_kinds(), Some(&[number_kind()][..]));

        let any_but_root = TransformerDefinition::builder("x")
            .accepts_when(|k| *k != ObjectKind::ROOT)
            .apply(|_| Err(TransformError::failed("unused")))
            .build()
            .unwrap();
        assert!(any_but_root.accepts(&number_kind()));
        assert!(!any_but_root.accepts(&ObjectKind::ROOT));
    }

    #[tokio::test]
    async fn sync_and_async_apply_share_one_entry_point() {
        let sync = double();
        let out = sync.apply(input(5.0, Params::new())).await.unwrap();
        assert_eq!(out.data::<f64>(), Some(&10.0));

        let add = TransformerDefinition::builder("number.add")
            .params(ParamSchema::new().with("amount", ParamDefinition::number(1.0)))
            .apply_async(|input| async move {
                let v = input.parent.data::<f64>().copied().unwrap_or_default();
                let amount = input.params.number("amount").unwrap_or(1.0);
                Ok(StateObject::new(ObjectKind::new("number"), "sum", v + amount))
            })
            .build()
            .unwrap();
        assert!(add.is_async());
        let out = add
            .apply(input(5.0, Params::new().with("amount", 2.0)))
            .await
            .unwrap();
        assert_eq!(out.data::<f64>(), Some(&7.0));
    }

    #[test]
    fn register_rejects_duplicates() {
        let registry = TransformerRegistry::new();
        registry.register(double()).unwrap();
        assert_eq!(
            registry.register(double()).unwrap_err(),
            RegistryError::DuplicateTransformer("number.double".into())
        );
    }

    #[test]
    fn new_registry_contains_the_root_transformer() {
        let registry = TransformerRegistry::new();
        assert!(registry.get(&ROOT_TRANSFORMER).is_some());
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn snapshots_are_unaffected_by_later_registration() {
        let registry = TransformerRegistry::new();
        let before = registry.snapshot();
        registry.register(double()).unwrap();

        assert!(!before.contains(&"number.double".into()));
        assert!(registry.snapshot().contains(&"number.double".into()));
        assert_eq!(
            registry.ids(),
            vec![TransformerId::from("number.double"), ROOT_TRANSFORMER]
        );
        assert_eq!(
            registry
                .snapshot()
                .definitions()
                .iter()
                .map(|d| d.id.as_str().to_string())
                .collect::<Vec<_>>(),
            vec!["number.double".to_string(), "root".to_string()]
        );
    }
}
