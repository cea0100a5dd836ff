//! Top-level perception handler.
//!
//! Ordering matters: the room description slot is read before the diff step
//! and written only after it, so "Room before change" is always the value the
//! previous turn left behind.

use crate::cognition::CognitiveStep;
use crate::dialogue::{Checkpoint, Fragmenter, Interruption, Outcome};
use crate::error::SoulError;
use crate::memory::WorkingMemory;
use crate::sensory::{PendingPerceptions, image};
use crate::types::{MemoryEntry, Perception, PerceptionKind};

use super::Soul;

pub const VISION_INSTRUCTIONS: &str = "describe this pixel art image.\n\
    - don't say it's pixel art\n\
    - ignore the gray floor and the beige wall\n\
    - ignore shadows\n\
    - there's a human in the image, just say where he is, don't describe him. refer to him like this \"the human is...\"\n\
    - use bulleted list, one item per object";

const WHAT_CHANGED: &str =
    "Name the one thing that changed in the room. Don't reflect about it, just observe what changed.";

impl Soul {
    /// Handle one invoking perception over `memory`, whose last entry is the
    /// host's echo of that perception.
    pub async fn handle(
        &self,
        memory: WorkingMemory,
        invoking: &Perception,
        pending: &dyn PendingPerceptions,
    ) -> Result<Outcome, SoulError> {
        let agent = self.dispatch.agent();
        self.dispatch.log("starting");
        if Interruption::new(pending, &self.dispatch).is_stale(Checkpoint::Entry) {
            return Ok(Outcome::Aborted { memory, spoken: 0 });
        }

        let room_before = self.scalars.room_description().await?;

        let description = match invoking.kind() {
            PerceptionKind::Image => {
                let data_uri = invoking.image().ok_or(SoulError::MissingImage)?;
                self.dispatch.log(image::log_preview(data_uri));
                self.describe_image(&memory, data_uri).await?
            }
            PerceptionKind::Description => invoking
                .description()
                .ok_or(SoulError::MissingDescription)?
                .to_owned(),
        };
        tracing::debug!(%agent, action = %invoking.action, "scene described");

        let name = memory.soul_name().to_owned();
        let memory = memory
            .without_last()
            .with_memory(MemoryEntry::assistant(format!("Room before change: {room_before}")))
            .with_memory(MemoryEntry::assistant(format!("Room after change: {description}")));

        self.dispatch.log("thinking about change");
        let (_, noticed) = self.steps.evaluate(&memory, CognitiveStep::brainstorm(WHAT_CHANGED)).await?;

        self.scalars.set_room_description(&description).await?;

        self.dispatch.log(format!("noticed change: {noticed}"));
        let memory = memory.with_memory(MemoryEntry::assistant(format!("{name} noticed: {noticed}")));

        self.dispatch.log("thinking about what happened");
        let (memory, _) = self
            .steps
            .evaluate(
                &memory,
                CognitiveStep::internal_monologue(
                    format!("{name} thinks about their situation and about what just happened in the room"),
                    "thought",
                ),
            )
            .await?;

        self.dispatch.log("speaking");
        let outcome = Fragmenter::new(&self.steps, &self.scalars, &self.dispatch, self.first_fragment_wait)
            .run(memory, pending)
            .await?;
        tracing::info!(%agent, fragments = outcome.spoken(), aborted = outcome.is_aborted(), "turn finished");
        Ok(outcome)
    }

    /// The vision view is the memory's first entry plus a user turn carrying
    /// the image.
    async fn describe_image(&self, memory: &WorkingMemory, image: &str) -> Result<String, SoulError> {
        let view = memory.slice(..1).with_memory(MemoryEntry::user_image(image));
        let (_, description) = self
            .steps
            .evaluate(&view, CognitiveStep::vision_describe(VISION_INSTRUCTIONS))
            .await?;
        self.dispatch.log(description.clone());
        Ok(description)
    }
}
