//! Stage workers: Router, Specialist, Validation, Orientation, Flagging,
//! Review. Each is a function over `(items, context) -> stage result`,
//! using the LLM Gateway and Batch Executor, then writing to Storage
//! (`spec.md` §2 point 5).

mod flagging;
mod orientation;
mod prompts;
mod review;
mod router;
mod specialist;
mod validation;

pub use flagging::{evaluate_flags, FlagInput};
pub use orientation::run as run_orientation;
pub use review::{run as run_review, ReviewInput};
pub use router::run as run_router;
pub use specialist::{build_registry, run as run_specialist, SpecialistWorker};
pub use validation::run as run_validation;

// Pure deterministic-override helpers, reused by the dry-run synthesizer in
// `pipeline` so a dry run applies the same override rules a live run would
// without ever constructing an LLM request.
pub(crate) use orientation::pinned_orientation;
pub(crate) use specialist::{
    currency_denomination_heuristic, family_override_temporal, forced_temporal_aggregation,
};
pub(crate) use validation::analyze as analyze_indicator;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::Config;
use crate::llm::Gateway;
use crate::storage::SqliteStore;
use crate::taxonomy::Taxonomy;

/// Cooperative cancellation: checked before starting a new batch or
/// singleton retry. In-flight requests are not forcibly aborted
/// (`spec.md` §4.7 point 6).
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Shared context threaded through every stage: the storage handle, the
/// single `execution_id` for this run, the resolved configuration, the LLM
/// gateway, the loaded taxonomy, and the cancellation token.
pub struct StageContext {
    pub store: SqliteStore,
    pub execution_id: String,
    pub config: Config,
    pub gateway: Arc<Gateway>,
    pub taxonomy: Arc<Taxonomy>,
    pub cancellation: CancellationToken,
}

impl StageContext {
    pub fn new(
        store: SqliteStore,
        execution_id: impl Into<String>,
        config: Config,
        gateway: Arc<Gateway>,
        taxonomy: Arc<Taxonomy>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            store,
            execution_id: execution_id.into(),
            config,
            gateway,
            taxonomy,
            cancellation,
        }
    }
}
