pub mod perceive;
pub mod summarize;

use std::time::Duration;

use crate::cognition::StepEvaluator;
use crate::config::SoulCfg;
use crate::io::output::Dispatcher;
use crate::memory::{SoulMemory, WorkingMemory};
use crate::types::MemoryEntry;

pub use summarize::{CONVERSATION_SUMMARY_TAG, SummaryPolicy};

/// One soul's controller: everything a perception-handling turn needs,
/// injected by the host.
pub struct Soul {
    steps: StepEvaluator,
    scalars: SoulMemory,
    dispatch: Dispatcher,
    first_fragment_wait: Duration,
    summary: SummaryPolicy,
}

impl Soul {
    pub fn new(cfg: &SoulCfg, steps: StepEvaluator, scalars: SoulMemory, dispatch: Dispatcher) -> Self {
        Self {
            steps,
            scalars,
            dispatch,
            first_fragment_wait: Duration::from_millis(cfg.first_fragment_wait_ms),
            summary: SummaryPolicy::from_cfg(cfg),
        }
    }

    pub fn scalars(&self) -> &SoulMemory {
        &self.scalars
    }

    pub fn dispatch(&self) -> &Dispatcher {
        &self.dispatch
    }
}

/// Canonical memory for a fresh soul: the blueprint as its only entry.
pub fn initial_memory(cfg: &SoulCfg) -> WorkingMemory {
    WorkingMemory::new(cfg.soul_name.as_str()).with_memory(MemoryEntry::system(cfg.blueprint.clone()))
}
