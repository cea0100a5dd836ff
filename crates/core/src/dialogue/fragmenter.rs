//! Dialogue Fragmenter: speaks one opening fragment, decides how many more to
//! add, paces them out, and optionally concludes.
//!
//! The flow is an explicit state machine. Every state that speaks is preceded
//! by an interruption checkpoint; on a stale turn the fragment just computed
//! is discarded and the memory from before its evaluation is returned.

use std::time::Duration;

use crate::cognition::{CognitiveStep, DecisionSpec, StepError, StepEvaluator};
use crate::dialogue::interrupt::{Checkpoint, Interruption, Outcome};
use crate::error::SoulError;
use crate::io::output::Dispatcher;
use crate::memory::{SoulMemory, WorkingMemory};
use crate::sensory::PendingPerceptions;

/// Choices for the follow-up fragment count, highest first.
pub const COUNT_CHOICES: [&str; 6] = ["5", "4", "3", "2", "1", "0"];
pub const CONCLUDE_CHOICES: [&str; 2] = ["yes", "no"];

/// Length of the next fragment, as decided by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentLength {
    VeryLong,
    Long,
    Medium,
    Short,
}

impl FragmentLength {
    pub const ALL: [FragmentLength; 4] = [Self::VeryLong, Self::Long, Self::Medium, Self::Short];

    pub fn as_choice(self) -> &'static str {
        match self {
            Self::VeryLong => "very long",
            Self::Long => "long",
            Self::Medium => "medium",
            Self::Short => "short",
        }
    }

    pub fn from_choice(choice: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.as_choice() == choice)
    }

    /// Pause before the fragment after this one.
    pub fn wait(self) -> Duration {
        Duration::from_millis(match self {
            Self::VeryLong => 6000,
            Self::Long => 4000,
            Self::Medium => 2000,
            Self::Short => 1000,
        })
    }

    pub fn target_words(self) -> u32 {
        match self {
            Self::VeryLong => 60,
            Self::Long => 40,
            Self::Medium => 20,
            Self::Short => 10,
        }
    }
}

/// Parse a count decision. Only "0".."5" are accepted.
pub fn parse_fragment_count(choice: &str) -> Result<u8, StepError> {
    choice
        .parse::<u8>()
        .ok()
        .filter(|n| *n <= 5)
        .ok_or_else(|| StepError::InvalidChoice {
            value: choice.to_owned(),
            choices: COUNT_CHOICES.iter().map(|c| c.to_string()).collect(),
        })
}

#[derive(Debug)]
enum State {
    Drafting,
    DecidingCount,
    Pacing,
    DecidingLength,
    Emitting(FragmentLength),
    Concluding,
    Closing,
    Done,
}

/// Mutable progress of one fragmenting flow.
struct Flow {
    memory: WorkingMemory,
    phrase: String,
    remaining: u8,
    wait: Duration,
    spoken: usize,
    emitted: usize,
}

pub struct Fragmenter<'a> {
    steps: &'a StepEvaluator,
    scalars: &'a SoulMemory,
    dispatch: &'a Dispatcher,
    first_wait: Duration,
}

impl<'a> Fragmenter<'a> {
    pub fn new(
        steps: &'a StepEvaluator,
        scalars: &'a SoulMemory,
        dispatch: &'a Dispatcher,
        first_wait: Duration,
    ) -> Self {
        Self { steps, scalars, dispatch, first_wait }
    }

    pub async fn run(
        &self,
        memory: WorkingMemory,
        pending: &dyn PendingPerceptions,
    ) -> Result<Outcome, SoulError> {
        let rule = Interruption::new(pending, self.dispatch);
        let name = memory.soul_name().to_owned();
        let mut flow = Flow {
            memory,
            phrase: String::new(),
            remaining: 0,
            wait: self.first_wait,
            spoken: 0,
            emitted: 0,
        };
        let mut state = State::Drafting;

        loop {
            tracing::trace!(agent = %self.dispatch.agent(), ?state, "fragmenter");
            state = match state {
                State::Drafting => {
                    let checkpoint = flow.memory.clone();
                    let step = CognitiveStep::external_dialog(format!(
                        "{name} shares a thought fragment, hinting at a larger conversation to unfold. WITHOUT USING ELLIPSES."
                    ));
                    let (memory, phrase) = self.steps.evaluate(&flow.memory, step).await?;
                    if rule.is_stale(Checkpoint::BeforeOpening) {
                        return Ok(flow.abort(checkpoint));
                    }
                    self.speak(&mut flow, memory, phrase);
                    if rule.is_stale(Checkpoint::AfterOpening) {
                        let memory = flow.memory.clone();
                        return Ok(flow.abort(memory));
                    }
                    State::DecidingCount
                }

                State::DecidingCount => {
                    let previous = self.scalars.fragment_count().await?;
                    let spec = DecisionSpec::new(
                        format!(
                            "How many additional conversational pieces will {name} want to express next?\n\
                             Vary the number of pieces for a natural flow.\n\
                             The last conversation involved {previous} pieces.\n\
                             Typically, expect 0. Occasionally, 1 or perhaps 2-5 pieces."
                        ),
                        COUNT_CHOICES,
                    )?;
                    let (_, choice) = self.steps.evaluate(&flow.memory, CognitiveStep::decision(spec)).await?;
                    let count = parse_fragment_count(&choice)?;
                    self.scalars.set_fragment_count(count).await?;
                    tracing::debug!(agent = %self.dispatch.agent(), fragments = count, "fragment count decided");
                    flow.remaining = count;
                    match count {
                        0 => State::Done,
                        1 => State::Concluding,
                        _ => State::Pacing,
                    }
                }

                State::Pacing => {
                    tokio::time::sleep(flow.wait).await;
                    State::DecidingLength
                }

                State::DecidingLength => {
                    let spec = DecisionSpec::new(
                        "How long should the next conversational piece be?",
                        FragmentLength::ALL.map(FragmentLength::as_choice),
                    )?;
                    let (_, choice) = self.steps.evaluate(&flow.memory, CognitiveStep::decision(spec)).await?;
                    let length =
                        FragmentLength::from_choice(&choice).ok_or_else(|| StepError::InvalidChoice {
                            value: choice.clone(),
                            choices: FragmentLength::ALL.map(|l| l.as_choice().to_owned()).to_vec(),
                        })?;
                    flow.wait = length.wait();
                    self.dispatch.log(format!("waiting for {}ms", flow.wait.as_millis()));
                    flow.remaining -= 1;
                    State::Emitting(length)
                }

                State::Emitting(length) => {
                    let checkpoint = flow.memory.clone();
                    let step = CognitiveStep::external_dialog(format!(
                        "- {name} shares another thought fragment, building on the previous one. WITHOUT USING ELLIPSES.\n\
                         - Ensure this piece is {} words in length\n\
                         - Their last shared thought was: \"{}\"",
                        length.target_words(),
                        flow.phrase
                    ));
                    let (memory, phrase) = self.steps.evaluate(&flow.memory, step).await?;
                    if rule.is_stale(Checkpoint::BeforeFragment(flow.emitted + 1)) {
                        return Ok(flow.abort(checkpoint));
                    }
                    self.speak(&mut flow, memory, phrase);
                    flow.emitted += 1;
                    if flow.remaining > 1 { State::Pacing } else { State::Concluding }
                }

                State::Concluding => {
                    let spec = DecisionSpec::new(
                        format!("Does {name} need to add another piece to conclude their last thought?"),
                        CONCLUDE_CHOICES,
                    )?;
                    let (_, choice) = self.steps.evaluate(&flow.memory, CognitiveStep::decision(spec)).await?;
                    if choice == "yes" { State::Closing } else { State::Done }
                }

                State::Closing => {
                    let checkpoint = flow.memory.clone();
                    let step = CognitiveStep::external_dialog(format!(
                        "{name} needs to conclude their last thought fragment in this conversation"
                    ));
                    let (memory, phrase) = self.steps.evaluate(&flow.memory, step).await?;
                    if rule.is_stale(Checkpoint::BeforeConclusion) {
                        return Ok(flow.abort(checkpoint));
                    }
                    self.speak(&mut flow, memory, phrase);
                    State::Done
                }

                State::Done => {
                    return Ok(Outcome::Completed { memory: flow.memory, spoken: flow.spoken });
                }
            };
        }
    }

    fn speak(&self, flow: &mut Flow, memory: WorkingMemory, phrase: String) {
        self.dispatch.speak(phrase.clone());
        flow.memory = memory;
        flow.phrase = phrase;
        flow.spoken += 1;
    }
}

impl Flow {
    fn abort(self, memory: WorkingMemory) -> Outcome {
        Outcome::Aborted { memory, spoken: self.spoken }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use milton_llm::provider::ScriptedProvider;
    use tokio::time::Instant;

    use crate::config::SoulCfg;
    use crate::io::output::{self, drain_says};
    use crate::memory::InMemoryScalarStore;
    use crate::sensory::pending;
    use crate::types::{AgentId, MemoryEntry, Perception};

    struct Rig {
        steps: StepEvaluator,
        scalars: SoulMemory,
        dispatch: Dispatcher,
        rx: output::DispatchReceiver,
        provider: Arc<ScriptedProvider>,
    }

    fn rig(provider: ScriptedProvider) -> Rig {
        let cfg = SoulCfg::default();
        let provider = Arc::new(provider);
        let (dispatch, rx) = output::channel(AgentId::new("dev-001"));
        Rig {
            steps: StepEvaluator::single(provider.clone(), &cfg),
            scalars: SoulMemory::new(Arc::new(InMemoryScalarStore::new()), AgentId::new("dev-001"), &cfg),
            dispatch,
            rx,
            provider,
        }
    }

    fn start() -> WorkingMemory {
        WorkingMemory::new("Milton").with_memory(MemoryEntry::system("persona"))
    }

    impl Rig {
        async fn run(&self, pending: &dyn PendingPerceptions) -> Result<Outcome, SoulError> {
            Fragmenter::new(&self.steps, &self.scalars, &self.dispatch, Duration::from_millis(1000))
                .run(start(), pending)
                .await
        }
    }

    #[test]
    fn length_mapping() {
        assert_eq!(FragmentLength::from_choice("very long"), Some(FragmentLength::VeryLong));
        assert_eq!(FragmentLength::VeryLong.wait(), Duration::from_millis(6000));
        assert_eq!(FragmentLength::Medium.target_words(), 20);
        assert_eq!(FragmentLength::Short.wait(), Duration::from_millis(1000));
        assert_eq!(FragmentLength::from_choice("tiny"), None);
    }

    #[test]
    fn count_parsing_is_bounded() {
        assert_eq!(parse_fragment_count("0").unwrap(), 0);
        assert_eq!(parse_fragment_count("5").unwrap(), 5);
        assert!(parse_fragment_count("6").is_err());
        assert!(parse_fragment_count("-1").is_err());
        assert!(parse_fragment_count("three").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_count_speaks_only_the_opening() {
        let mut r = rig(ScriptedProvider::new(["Milton said: \"Hello there.\"", "0"]));
        let outcome = r.run(&Vec::<Perception>::new()).await.unwrap();
        assert!(!outcome.is_aborted());
        assert_eq!(outcome.spoken(), 1);
        assert_eq!(drain_says(&mut r.rx), ["Hello there."]);
        assert_eq!(r.scalars.fragment_count().await.unwrap(), 0);
        assert_eq!(outcome.memory().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn count_three_runs_two_paced_fragments() {
        let mut r = rig(ScriptedProvider::new([
            "Milton said: \"One.\"",
            "3",
            "medium",
            "Milton said: \"Two.\"",
            "short",
            "Milton said: \"Three.\"",
            "no",
        ]));
        let began = Instant::now();
        let outcome = r.run(&Vec::<Perception>::new()).await.unwrap();

        assert_eq!(drain_says(&mut r.rx), ["One.", "Two.", "Three."]);
        assert_eq!(outcome.spoken(), 3);
        assert_eq!(r.scalars.fragment_count().await.unwrap(), 3);
        // first wait is the default 1000ms, second follows "medium"
        let elapsed = began.elapsed();
        assert!(elapsed >= Duration::from_millis(3000) && elapsed < Duration::from_millis(3100));

        let requests = r.provider.requests();
        let prompt = &requests[3].messages.last().unwrap().content;
        assert!(prompt.contains("20 words in length"));
        assert!(prompt.contains("Their last shared thought was: \"One.\""));
    }

    #[tokio::test(start_paused = true)]
    async fn conclusion_is_spoken_and_kept() {
        let mut r = rig(ScriptedProvider::new(["Milton said: \"Hm.\"", "1", "yes", "Milton said: \"Done.\""]));
        let outcome = r.run(&Vec::<Perception>::new()).await.unwrap();
        assert_eq!(drain_says(&mut r.rx), ["Hm.", "Done."]);
        assert_eq!(outcome.memory().last().unwrap().text(), "Milton said: \"Done.\"");
    }

    #[tokio::test(start_paused = true)]
    async fn previous_count_seeds_the_decision() {
        let r = rig(ScriptedProvider::new(["x", "0"]));
        r.scalars.set_fragment_count(4).await.unwrap();
        r.run(&Vec::<Perception>::new()).await.unwrap();
        let prompt = r.provider.requests()[1].messages.last().unwrap().content.clone();
        assert!(prompt.contains("The last conversation involved 4 pieces."));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_before_opening_speaks_nothing() {
        let mut r = rig(ScriptedProvider::new(["Milton said: \"Hi.\""]));
        let pending = vec![Perception::describe_object("new")];
        let outcome = r.run(&pending).await.unwrap();
        assert!(outcome.is_aborted());
        assert_eq!(outcome.spoken(), 0);
        assert_eq!(outcome.into_memory(), start());
        assert!(drain_says(&mut r.rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn arrival_during_pacing_discards_next_fragment() {
        let (arrivals, queue) = pending::channel();
        let provider = ScriptedProvider::new([
            "Milton said: \"One.\"",
            "2",
            "long",
            "Milton said: \"Never heard.\"",
        ])
        .with_hook(move |i, _| {
            if i == 2 {
                arrivals.send(Perception::describe_object("interrupt")).unwrap();
            }
        });
        let mut r = rig(provider);
        let outcome = r.run(&queue).await.unwrap();

        assert_eq!(drain_says(&mut r.rx), ["One."]);
        assert!(outcome.is_aborted());
        assert_eq!(outcome.memory().last().unwrap().text(), "Milton said: \"One.\"");
    }

    #[tokio::test(start_paused = true)]
    async fn arrival_during_conclusion_discards_it() {
        let (arrivals, queue) = pending::channel();
        let provider = ScriptedProvider::new(["Milton said: \"Hm.\"", "1", "yes", "Milton said: \"Unheard.\""])
            .with_hook(move |i, _| {
                if i == 3 {
                    arrivals.send(Perception::describe_object("interrupt")).unwrap();
                }
            });
        let mut r = rig(provider);
        let outcome = r.run(&queue).await.unwrap();

        assert!(outcome.is_aborted());
        assert_eq!(outcome.spoken(), 1);
        assert_eq!(drain_says(&mut r.rx), ["Hm."]);

        // the closing step saw exactly the memory that comes back
        let requests = r.provider.requests();
        let seen = &requests[3].messages;
        assert_eq!(outcome.memory().to_messages().as_slice(), &seen[..seen.len() - 1]);
        assert_eq!(outcome.memory().last().unwrap().text(), "Milton said: \"Hm.\"");
    }

    /// Reports an arrival once it has been asked `quiet_checks` times.
    struct ArrivesAfter {
        checks: AtomicUsize,
        quiet_checks: usize,
    }

    impl PendingPerceptions for ArrivesAfter {
        fn pending_count(&self) -> usize {
            let seen = self.checks.fetch_add(1, Ordering::SeqCst);
            usize::from(seen >= self.quiet_checks)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn arrival_while_speaking_the_opening_stops_before_counting() {
        let mut r = rig(ScriptedProvider::new(["Milton said: \"Hi.\"", "3"]));
        let pending = ArrivesAfter { checks: AtomicUsize::new(0), quiet_checks: 1 };
        let outcome = r.run(&pending).await.unwrap();

        assert!(outcome.is_aborted());
        assert_eq!(outcome.spoken(), 1);
        assert_eq!(drain_says(&mut r.rx), ["Hi."]);
        assert_eq!(outcome.memory().len(), 2);
        assert_eq!(outcome.memory().last().unwrap().text(), "Milton said: \"Hi.\"");
        assert_eq!(r.provider.call_count(), 1);
        assert_eq!(r.scalars.fragment_count().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_count_is_reasoning_failure() {
        let mut r = rig(ScriptedProvider::new(["Milton said: \"Hi.\"", "seven"]));
        let err = r.run(&Vec::<Perception>::new()).await.unwrap_err();
        assert!(err.is_reasoning_unavailable());
        assert_eq!(drain_says(&mut r.rx), ["Hi."]);
        assert_eq!(r.scalars.fragment_count().await.unwrap(), 0);
    }
}
