use super::cell::CellStore;
use crate::core::models::ids::Ref;
use crate::core::models::object::StateObject;
use crate::core::models::params::Params;
use std::sync::Arc;

/// Runtime information handed to a transformer alongside its inputs.
///
/// The engine never interrupts a running transformer. Long computations may
/// poll [`TransformContext::is_stale`] and give up early; whatever they return
/// after going stale is discarded anyway.
#[derive(Clone)]
pub struct TransformContext {
    node_ref: Ref,
    version: u64,
    cells: Arc<CellStore>,
}

impl TransformContext {
    pub(crate) fn new(node_ref: Ref, version: u64, cells: Arc<CellStore>) -> Self {
        Self {
            node_ref,
            version,
            cells,
        }
    }

    pub fn node_ref(&self) -> Ref {
        self.node_ref
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether the node was invalidated again or removed since this computation started.
    pub fn is_stale(&self) -> bool {
        !self.cells.is_current(self.node_ref, self.version)
    }
}

impl std::fmt::Debug for TransformContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformContext")
            .field("node_ref", &self.node_ref)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Everything a transformer may read. The parent object is shared, never copied.
#[derive(Debug, Clone)]
pub struct TransformInput {
    pub parent: Arc<StateObject>,
    pub params: Params,
    pub context: TransformContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_goes_stale_after_invalidation_and_removal() {
        let cells = Arc::new(CellStore::default());
        let r = Ref::new();
        cells.create(r);
        let v = cells.invalidate(r).unwrap();
        let ctx = TransformContext::new(r, v, cells.clone());
        assert!(!ctx.is_stale());

        cells.invalidate(r);
        assert!(ctx.is_stale());

        let v = cells.invalidate(r).unwrap();
        let ctx = TransformContext::new(r, v, cells.clone());
        cells.remove(r);
        assert!(ctx.is_stale());
    }
}
