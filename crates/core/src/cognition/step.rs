//! Cognitive Step Evaluator: one reasoning-backend call per step.
//!
//! A step takes the current working memory plus a request (free text, a
//! decision over a finite choice set, or an image description), calls the
//! backend exactly once, and returns the value together with a new memory view
//! that records the step's result. Retries belong to the transport
//! ([`milton_llm::provider::LlmRouter`]), never to this module.

use std::sync::Arc;

use milton_llm::provider::{ChatMessage, CompletionRequest, LlmError, LlmProvider, Role};
use serde_json::Value;

use super::prompt;
use crate::config::SoulCfg;
use crate::memory::WorkingMemory;
use crate::types::MemoryEntry;

/// How a free-text step is framed and recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Voice {
    /// Spoken words: `{name} said: "..."`.
    ExternalDialog,
    /// Private thought: `{name} {verb}: "..."`.
    InternalMonologue { verb: String },
    /// One open-ended observation, recorded as `{name} noticed: "..."`.
    Brainstorm,
    /// Rewrite of a running notes paragraph, seeded with `existing`.
    SeriesNotes { existing: String },
}

impl Voice {
    fn tag(&self) -> &'static str {
        match self {
            Self::ExternalDialog => "external_dialog",
            Self::InternalMonologue { .. } => "internal_monologue",
            Self::Brainstorm => "brainstorm",
            Self::SeriesNotes { .. } => "series_notes",
        }
    }
}

/// A finite decision. `choices` is ordered and never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionSpec {
    description: String,
    choices: Vec<String>,
}

impl DecisionSpec {
    pub fn new<I, S>(description: impl Into<String>, choices: I) -> Result<Self, StepError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let choices: Vec<String> = choices.into_iter().map(Into::into).collect();
        if choices.is_empty() {
            return Err(StepError::NoChoices);
        }
        Ok(Self { description: description.into(), choices })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn choices(&self) -> &[String] {
        &self.choices
    }
}

/// One unit of thought.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CognitiveStep {
    FreeText { instructions: String, voice: Voice },
    Decision(DecisionSpec),
    /// Needs a user turn carrying an image in the memory it runs over.
    VisionDescribe { instructions: String },
}

impl CognitiveStep {
    pub fn external_dialog(instructions: impl Into<String>) -> Self {
        Self::FreeText { instructions: instructions.into(), voice: Voice::ExternalDialog }
    }

    pub fn internal_monologue(instructions: impl Into<String>, verb: impl Into<String>) -> Self {
        Self::FreeText {
            instructions: instructions.into(),
            voice: Voice::InternalMonologue { verb: verb.into() },
        }
    }

    pub fn brainstorm(instructions: impl Into<String>) -> Self {
        Self::FreeText { instructions: instructions.into(), voice: Voice::Brainstorm }
    }

    pub fn decision(spec: DecisionSpec) -> Self {
        Self::Decision(spec)
    }

    pub fn vision_describe(instructions: impl Into<String>) -> Self {
        Self::VisionDescribe { instructions: instructions.into() }
    }

    fn tag(&self) -> &'static str {
        match self {
            Self::FreeText { voice, .. } => voice.tag(),
            Self::Decision(_) => "decision",
            Self::VisionDescribe { .. } => "vision_describe",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("reasoning backend unavailable: {0}")]
    Unavailable(#[from] LlmError),
    #[error("reasoning backend returned empty content")]
    Empty,
    #[error("decision returned {value:?}, not one of {choices:?}")]
    InvalidChoice { value: String, choices: Vec<String> },
    #[error("decision declared no choices")]
    NoChoices,
    #[error("vision step needs a user turn carrying an image")]
    MissingImageTurn,
}

impl StepError {
    /// Every step failure means the same thing to the controller: reasoning
    /// for this turn is unavailable.
    pub fn is_reasoning_unavailable(&self) -> bool {
        true
    }
}

/// Evaluates cognitive steps against a quality model and a vision model.
pub struct StepEvaluator {
    quality: Arc<dyn LlmProvider>,
    vision: Arc<dyn LlmProvider>,
    max_tokens: u32,
    vision_max_tokens: u32,
    temperature: f32,
}

impl StepEvaluator {
    pub fn new(quality: Arc<dyn LlmProvider>, vision: Arc<dyn LlmProvider>, cfg: &SoulCfg) -> Self {
        Self {
            quality,
            vision,
            max_tokens: cfg.step_max_tokens,
            vision_max_tokens: cfg.vision_max_tokens,
            temperature: cfg.step_temperature,
        }
    }

    /// One provider serving both roles.
    pub fn single(provider: Arc<dyn LlmProvider>, cfg: &SoulCfg) -> Self {
        Self::new(provider.clone(), provider, cfg)
    }

    /// Run `step` over `memory`. Returns the memory with the step's result
    /// appended, and the value. Decision values are always members of the
    /// declared choices.
    pub async fn evaluate(
        &self,
        memory: &WorkingMemory,
        step: CognitiveStep,
    ) -> Result<(WorkingMemory, String), StepError> {
        let name = memory.soul_name().to_owned();
        let tag = step.tag();

        let (provider, max_tokens) = match &step {
            CognitiveStep::VisionDescribe { .. } => {
                if !memory.entries().iter().any(|e| e.role == Role::User && e.content.has_image()) {
                    return Err(StepError::MissingImageTurn);
                }
                (&self.vision, self.vision_max_tokens)
            }
            CognitiveStep::Decision(spec) if spec.choices.is_empty() => return Err(StepError::NoChoices),
            _ => (&self.quality, self.max_tokens),
        };

        let mut messages = memory.to_messages();
        messages.push(ChatMessage::text(Role::System, command(&name, &step)));
        let request = CompletionRequest { messages, max_tokens, temperature: self.temperature };

        tracing::debug!(step = tag, provider = provider.name(), "cognitive step");
        let response = provider.complete(request).await?;
        let raw = response.content.trim();
        if raw.is_empty() {
            return Err(StepError::Empty);
        }

        let (entry, value) = record(&name, &step, raw)?;
        Ok((memory.with_memory(entry.with_metadata("step", Value::from(tag))), value))
    }
}

fn command(name: &str, step: &CognitiveStep) -> String {
    match step {
        CognitiveStep::FreeText { instructions, voice } => match voice {
            Voice::ExternalDialog => prompt::external_dialog(name, instructions),
            Voice::InternalMonologue { verb } => prompt::internal_monologue(name, verb, instructions),
            Voice::Brainstorm => prompt::brainstorm(name, instructions),
            Voice::SeriesNotes { existing } => prompt::series_notes(name, existing),
        },
        CognitiveStep::Decision(spec) => prompt::decision(name, &spec.description, &spec.choices),
        CognitiveStep::VisionDescribe { instructions } => instructions.clone(),
    }
}

/// Post-process a raw reply into (memory entry, value).
fn record(name: &str, step: &CognitiveStep, raw: &str) -> Result<(MemoryEntry, String), StepError> {
    let spoken = |verb: &str| -> Result<(MemoryEntry, String), StepError> {
        let value = prompt::strip_entity_and_verb(name, verb, raw);
        if value.is_empty() {
            return Err(StepError::Empty);
        }
        Ok((MemoryEntry::assistant(format!("{name} {verb}: \"{value}\"")), value))
    };

    match step {
        CognitiveStep::FreeText { voice, .. } => match voice {
            Voice::ExternalDialog => spoken("said"),
            Voice::InternalMonologue { verb } => spoken(verb),
            Voice::Brainstorm => spoken("noticed"),
            Voice::SeriesNotes { .. } => Ok((MemoryEntry::assistant(raw), raw.to_owned())),
        },
        CognitiveStep::VisionDescribe { .. } => Ok((MemoryEntry::assistant(raw), raw.to_owned())),
        CognitiveStep::Decision(spec) => {
            let choice = prompt::normalize_choice(name, raw);
            match spec.choices.iter().find(|c| **c == choice) {
                Some(c) => Ok((MemoryEntry::assistant(format!("{name} decided: {c}")), c.clone())),
                None => Err(StepError::InvalidChoice { value: raw.to_owned(), choices: spec.choices.clone() }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use milton_llm::provider::{MockProvider, ScriptedProvider};

    fn memory() -> WorkingMemory {
        WorkingMemory::new("Milton").with_memory(MemoryEntry::system("persona"))
    }

    fn evaluator(provider: Arc<dyn LlmProvider>) -> StepEvaluator {
        StepEvaluator::single(provider, &SoulCfg::default())
    }

    #[tokio::test]
    async fn external_dialog_records_said_and_returns_stripped_text() {
        let provider = Arc::new(ScriptedProvider::new(["Milton said: \"Oh. A chair.\""]));
        let (mem, value) = evaluator(provider.clone())
            .evaluate(&memory(), CognitiveStep::external_dialog("Share a thought."))
            .await
            .unwrap();
        assert_eq!(value, "Oh. A chair.");
        assert_eq!(mem.len(), 2);
        assert_eq!(mem.last().unwrap().text(), "Milton said: \"Oh. A chair.\"");
        assert_eq!(mem.last().unwrap().metadata["step"], "external_dialog");

        let requests = provider.requests();
        let req = &requests[0];
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[1].role, Role::System);
        assert!(req.messages[1].content.contains("Share a thought."));
    }

    #[tokio::test]
    async fn input_memory_is_not_mutated() {
        let base = memory();
        let provider = Arc::new(MockProvider::new("hm"));
        let (mem, _) = evaluator(provider).evaluate(&base, CognitiveStep::thought_for_test()).await.unwrap();
        assert_eq!(base.len(), 1);
        assert_eq!(mem.len(), 2);
    }

    #[tokio::test]
    async fn decision_returns_member_of_choices() {
        let provider = Arc::new(ScriptedProvider::new(["Milton decided: 3"]));
        let spec = DecisionSpec::new("How many?", ["5", "4", "3", "2", "1", "0"]).unwrap();
        let (mem, value) = evaluator(provider)
            .evaluate(&memory(), CognitiveStep::decision(spec))
            .await
            .unwrap();
        assert_eq!(value, "3");
        assert_eq!(mem.last().unwrap().text(), "Milton decided: 3");
    }

    #[tokio::test]
    async fn decision_outside_choices_is_an_error() {
        let provider = Arc::new(ScriptedProvider::new(["7"]));
        let spec = DecisionSpec::new("How many?", ["5", "4", "3", "2", "1", "0"]).unwrap();
        let err = evaluator(provider)
            .evaluate(&memory(), CognitiveStep::decision(spec))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::InvalidChoice { ref value, .. } if value == "7"));
        assert!(err.is_reasoning_unavailable());
    }

    #[tokio::test]
    async fn decision_is_not_clamped_or_fuzzy_matched() {
        let provider = Arc::new(ScriptedProvider::new(["longish"]));
        let spec = DecisionSpec::new("How long?", ["very long", "long", "medium", "short"]).unwrap();
        assert!(matches!(
            evaluator(provider).evaluate(&memory(), CognitiveStep::decision(spec)).await,
            Err(StepError::InvalidChoice { .. })
        ));
    }

    #[test]
    fn empty_choices_rejected_at_construction() {
        assert!(matches!(DecisionSpec::new("?", Vec::<String>::new()), Err(StepError::NoChoices)));
    }

    #[tokio::test]
    async fn backend_failure_and_empty_content_are_unavailable() {
        let provider = Arc::new(ScriptedProvider::from_results([
            Err(LlmError::RequestFailed("boom".into())),
            Ok("   ".into()),
            Ok("Milton said: \"\"".into()),
        ]));
        let ev = evaluator(provider.clone());
        let step = || CognitiveStep::external_dialog("x");
        assert!(matches!(ev.evaluate(&memory(), step()).await, Err(StepError::Unavailable(_))));
        assert!(matches!(ev.evaluate(&memory(), step()).await, Err(StepError::Empty)));
        assert!(matches!(ev.evaluate(&memory(), step()).await, Err(StepError::Empty)));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn each_voice_records_its_own_shape() {
        let provider = Arc::new(ScriptedProvider::new([
            "Milton noticed: \"a chair\"",
            "Milton noted: \"rooms change\"",
            "Milton keeps seeing furniture appear.",
        ]));
        let ev = evaluator(provider.clone());
        let notes = Voice::SeriesNotes { existing: "Nothing yet.".into() };
        let steps = [
            CognitiveStep::brainstorm("what changed"),
            CognitiveStep::internal_monologue("what have I learned", "noted"),
            CognitiveStep::FreeText { instructions: String::new(), voice: notes },
        ];
        let mut recorded = Vec::new();
        for step in steps {
            let (mem, value) = ev.evaluate(&memory(), step).await.unwrap();
            let last = mem.last().unwrap();
            recorded.push((last.text(), value, last.metadata["step"].clone()));
        }

        assert_eq!(recorded[0].0, "Milton noticed: \"a chair\"");
        assert_eq!(recorded[0].1, "a chair");
        assert_eq!(recorded[0].2, "brainstorm");
        assert_eq!(recorded[1].0, "Milton noted: \"rooms change\"");
        assert_eq!(recorded[1].2, "internal_monologue");
        assert_eq!(recorded[2].0, "Milton keeps seeing furniture appear.");
        assert_eq!(recorded[2].1, "Milton keeps seeing furniture appear.");
        assert_eq!(recorded[2].2, "series_notes");

        let requests = provider.requests();
        assert!(requests[2].messages.last().unwrap().content.contains("## Existing notes\nNothing yet."));
    }

    #[tokio::test]
    async fn vision_requires_image_turn_and_uses_vision_provider() {
        let quality = Arc::new(ScriptedProvider::new(Vec::<String>::new()));
        let vision = Arc::new(ScriptedProvider::new(["- a red chair in the corner"]));
        let ev = StepEvaluator::new(quality.clone(), vision.clone(), &SoulCfg::default());

        let err = ev.evaluate(&memory(), CognitiveStep::vision_describe("describe")).await.unwrap_err();
        assert!(matches!(err, StepError::MissingImageTurn));
        assert_eq!(vision.call_count(), 0);

        let with_image = memory().with_memory(MemoryEntry::user_image("data:image/png;base64,AA"));
        let (_, value) = ev.evaluate(&with_image, CognitiveStep::vision_describe("describe")).await.unwrap();
        assert_eq!(value, "- a red chair in the corner");
        assert_eq!(quality.call_count(), 0);
        assert!(vision.requests()[0].messages[1].has_image());
        assert_eq!(vision.requests()[0].max_tokens, SoulCfg::default().vision_max_tokens);
    }

    impl CognitiveStep {
        fn thought_for_test() -> Self {
            Self::FreeText { instructions: "think".into(), voice: Voice::InternalMonologue { verb: "thought".into() } }
        }
    }
}
