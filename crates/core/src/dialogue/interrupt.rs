use std::fmt;

use crate::io::output::Dispatcher;
use crate::memory::WorkingMemory;
use crate::sensory::PendingPerceptions;

/// How one perception-handling turn ended.
///
/// `Aborted` is the stale-invocation path: a newer perception arrived, so the
/// turn stopped at a checkpoint and `memory` is the last-known-good snapshot.
/// It is a normal result, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed { memory: WorkingMemory, spoken: usize },
    Aborted { memory: WorkingMemory, spoken: usize },
}

impl Outcome {
    pub fn memory(&self) -> &WorkingMemory {
        match self {
            Self::Completed { memory, .. } | Self::Aborted { memory, .. } => memory,
        }
    }

    pub fn into_memory(self) -> WorkingMemory {
        match self {
            Self::Completed { memory, .. } | Self::Aborted { memory, .. } => memory,
        }
    }

    /// Fragments actually spoken during the turn.
    pub fn spoken(&self) -> usize {
        match self {
            Self::Completed { spoken, .. } | Self::Aborted { spoken, .. } => *spoken,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

/// Where the interruption rule is being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Handler entry, before any work.
    Entry,
    /// Before speaking the opening fragment.
    BeforeOpening,
    /// Right after the opening fragment was spoken.
    AfterOpening,
    /// Before speaking the n-th follow-up fragment (1-based).
    BeforeFragment(usize),
    /// Before speaking the concluding fragment.
    BeforeConclusion,
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry => f.write_str("entry"),
            Self::BeforeOpening => f.write_str("before-opening"),
            Self::AfterOpening => f.write_str("after-opening"),
            Self::BeforeFragment(n) => write!(f, "before-fragment-{n}"),
            Self::BeforeConclusion => f.write_str("before-conclusion"),
        }
    }
}

/// The interruption rule: a turn is stale as soon as any perception is
/// pending. Evaluated fresh at every checkpoint.
pub struct Interruption<'a> {
    pending: &'a dyn PendingPerceptions,
    dispatch: &'a Dispatcher,
}

impl<'a> Interruption<'a> {
    pub fn new(pending: &'a dyn PendingPerceptions, dispatch: &'a Dispatcher) -> Self {
        Self { pending, dispatch }
    }

    /// True if the turn must abort at `checkpoint`.
    pub fn is_stale(&self, checkpoint: Checkpoint) -> bool {
        let pending = self.pending.pending_count();
        if pending == 0 {
            return false;
        }
        tracing::debug!(agent = %self.dispatch.agent(), %checkpoint, pending, "stale invocation");
        self.dispatch.log("aborting because of pending perceptions");
        true
    }
}
