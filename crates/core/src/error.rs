use crate::cognition::StepError;
use crate::memory::MemoryStoreError;

/// Fatal failures of one perception-handling turn.
///
/// A stale invocation is not listed here; it is reported as
/// [`crate::dialogue::Outcome::Aborted`].
#[derive(Debug, thiserror::Error)]
pub enum SoulError {
    #[error("addObject perception carries no image")]
    MissingImage,
    #[error("perception carries neither a description nor content")]
    MissingDescription,
    #[error("reasoning unavailable: {0}")]
    Reasoning(#[from] StepError),
    #[error("scalar memory: {0}")]
    Memory(#[from] MemoryStoreError),
}

impl SoulError {
    /// The turn failed because the reasoning backend could not produce a
    /// usable answer, including decisions outside their choice set.
    pub fn is_reasoning_unavailable(&self) -> bool {
        matches!(self, Self::Reasoning(e) if e.is_reasoning_unavailable())
    }
}
