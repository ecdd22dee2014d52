use super::cell::CellStatus;
use crate::core::models::ids::Ref;
use std::sync::Arc;

/// Coarse progress of a transaction, meant for progress bars and status lines.
/// Observers that need the actual values subscribe to the event bus instead.
#[derive(Debug, Clone)]
pub enum Progress {
    TransactionStart { edits: usize },
    UpdateStart { total_refs: u64 },
    RefResolved { node_ref: Ref, status: CellStatus },
    UpdateFinish,

    Message(String),
}

pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Cloneable sink for [`Progress`] events. Reporting without a callback is a no-op.
#[derive(Default, Clone)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
