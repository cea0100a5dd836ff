//! Memory summarization subprocess, run by the host after a completed turn.

use crate::cognition::{CognitiveStep, Voice};
use crate::config::SoulCfg;
use crate::error::SoulError;
use crate::memory::WorkingMemory;
use crate::types::{MemoryContent, MemoryEntry};

use super::Soul;

/// Metadata key marking the running conversation summary entry.
pub const CONVERSATION_SUMMARY_TAG: &str = "conversation_summary";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryPolicy {
    /// Summarize once memory holds more entries than this.
    pub threshold: usize,
    /// Entries kept from the front when a summary entry already exists.
    pub head_len: usize,
    /// Most recent entries kept verbatim.
    pub tail_len: usize,
}

impl SummaryPolicy {
    pub fn from_cfg(cfg: &SoulCfg) -> Self {
        Self {
            threshold: cfg.summarize_threshold,
            head_len: cfg.summary_head_len,
            tail_len: cfg.summary_tail_len,
        }
    }

    /// Up to `tail_len` trailing entries, never reaching into the first `head`.
    fn tail_after(&self, memory: &WorkingMemory, head: usize) -> WorkingMemory {
        memory.tail(self.tail_len.min(memory.len().saturating_sub(head)))
    }
}

impl Soul {
    /// Fold older entries into the running notes. Returns `memory` unchanged
    /// while it is at or below the threshold.
    pub async fn summarize(&self, memory: WorkingMemory) -> Result<WorkingMemory, SoulError> {
        let policy = self.summary;
        if memory.len() <= policy.threshold {
            return Ok(memory);
        }
        self.dispatch.log("[summarizes] summarizing series of events");

        let (with_thoughts, _) = self
            .steps
            .evaluate(&memory, CognitiveStep::internal_monologue("What have I learned so far.", "noted"))
            .await?;
        let existing = self.scalars.conversation_notes().await?;
        let (_, notes) = self
            .steps
            .evaluate(
                &with_thoughts,
                CognitiveStep::FreeText {
                    instructions: String::new(),
                    voice: Voice::SeriesNotes { existing },
                },
            )
            .await?;
        self.scalars.set_conversation_notes(&notes).await?;
        self.dispatch.log("[summarizes] done summarizing");

        if memory.find_tagged(CONVERSATION_SUMMARY_TAG).is_some() {
            let refreshed = memory.map(|entry| {
                if entry.is_tagged(CONVERSATION_SUMMARY_TAG) {
                    MemoryEntry { content: MemoryContent::Text(notes.clone()), ..entry.clone() }
                } else {
                    entry.clone()
                }
            });
            let head = refreshed.slice(..policy.head_len);
            return Ok(head.concat(&policy.tail_after(&refreshed, head.len())));
        }

        let summary = MemoryEntry::assistant(format!("## Conversation so far\n{notes}"))
            .with_metadata(CONVERSATION_SUMMARY_TAG, true);
        let tail = policy.tail_after(&memory, 1);
        Ok(memory.slice(..1).with_memory(summary).concat(&tail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use milton_llm::provider::ScriptedProvider;

    use crate::cognition::StepEvaluator;
    use crate::io::output;
    use crate::memory::{InMemoryScalarStore, SoulMemory};
    use crate::types::AgentId;

    fn soul(provider: Arc<ScriptedProvider>) -> Soul {
        soul_with(provider, SoulCfg::default())
    }

    fn soul_with(provider: Arc<ScriptedProvider>, cfg: SoulCfg) -> Soul {
        let (dispatch, _rx) = output::channel(AgentId::new("dev-001"));
        Soul::new(
            &cfg,
            StepEvaluator::single(provider, &cfg),
            SoulMemory::new(Arc::new(InMemoryScalarStore::new()), AgentId::new("dev-001"), &cfg),
            dispatch,
        )
    }

    fn memory(n: usize) -> WorkingMemory {
        let mut entries = vec![MemoryEntry::system("persona")];
        entries.extend((1..n).map(|i| MemoryEntry::user(format!("m{i}"))));
        WorkingMemory::from_entries("Milton", entries)
    }

    #[tokio::test]
    async fn below_threshold_is_untouched() {
        let provider = Arc::new(ScriptedProvider::new(Vec::<String>::new()));
        let soul = soul(provider.clone());
        let m = memory(15);
        assert_eq!(soul.summarize(m.clone()).await.unwrap(), m);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn first_summary_keeps_head_and_tail() {
        let provider = Arc::new(ScriptedProvider::new(["Milton noted: \"stuff\"", "Notes v1."]));
        let soul = soul(provider.clone());
        let out = soul.summarize(memory(16)).await.unwrap();

        assert_eq!(out.len(), 1 + 1 + 8);
        assert_eq!(out.first().unwrap().text(), "persona");
        let summary = &out.entries()[1];
        assert!(summary.is_tagged(CONVERSATION_SUMMARY_TAG));
        assert_eq!(summary.text(), "## Conversation so far\nNotes v1.");
        assert_eq!(out.last().unwrap().text(), "m15");
        assert_eq!(soul.scalars().conversation_notes().await.unwrap(), "Notes v1.");

        let requests = provider.requests();
        let notes_prompt = &requests[1].messages.last().unwrap().content;
        assert!(notes_prompt.contains("is experiencing a series of events"));
    }

    #[tokio::test]
    async fn existing_summary_is_replaced_in_place() {
        let provider = Arc::new(ScriptedProvider::new(["Milton noted: \"more\"", "Notes v2."]));
        let soul = soul(provider);
        let mut entries = vec![
            MemoryEntry::system("persona"),
            MemoryEntry::assistant("old notes").with_metadata(CONVERSATION_SUMMARY_TAG, true),
        ];
        entries.extend((0..14).map(|i| MemoryEntry::user(format!("t{i}"))));
        let out = soul.summarize(WorkingMemory::from_entries("Milton", entries)).await.unwrap();

        assert_eq!(out.len(), 2 + 8);
        assert_eq!(out.entries()[1].text(), "Notes v2.");
        assert!(out.entries()[1].is_tagged(CONVERSATION_SUMMARY_TAG));
        assert_eq!(out.entries()[2].text(), "t6");
    }

    fn wide_tail() -> SoulCfg {
        SoulCfg {
            summarize_threshold: 4,
            summary_head_len: 3,
            summary_tail_len: 10,
            ..SoulCfg::default()
        }
    }

    #[tokio::test]
    async fn long_tail_does_not_repeat_the_persona() {
        let provider = Arc::new(ScriptedProvider::new(["Milton noted: \"a\"", "Short notes."]));
        let soul = soul_with(provider, wide_tail());
        let out = soul.summarize(memory(6)).await.unwrap();

        let texts: Vec<String> = out.entries().iter().map(MemoryEntry::text).collect();
        assert_eq!(
            texts,
            ["persona", "## Conversation so far\nShort notes.", "m1", "m2", "m3", "m4", "m5"]
        );
    }

    #[tokio::test]
    async fn overlapping_head_and_tail_keep_each_entry_once() {
        let provider = Arc::new(ScriptedProvider::new(["Milton noted: \"b\"", "Newer notes."]));
        let soul = soul_with(provider, wide_tail());
        let mut entries = vec![
            MemoryEntry::system("persona"),
            MemoryEntry::assistant("old notes").with_metadata(CONVERSATION_SUMMARY_TAG, true),
        ];
        entries.extend((0..4).map(|i| MemoryEntry::user(format!("t{i}"))));
        let out = soul.summarize(WorkingMemory::from_entries("Milton", entries)).await.unwrap();

        let texts: Vec<String> = out.entries().iter().map(MemoryEntry::text).collect();
        assert_eq!(texts, ["persona", "Newer notes.", "t0", "t1", "t2", "t3"]);
        assert_eq!(out.entries().iter().filter(|e| e.is_tagged(CONVERSATION_SUMMARY_TAG)).count(), 1);
    }

    #[tokio::test]
    async fn failure_surfaces_without_writing_notes() {
        let provider = Arc::new(ScriptedProvider::new(["Milton noted: \"x\""]));
        let soul = soul(provider);
        assert!(soul.summarize(memory(20)).await.is_err());
        assert!(soul.scalars().conversation_notes().await.unwrap().starts_with("Milton is experiencing"));
    }
}
