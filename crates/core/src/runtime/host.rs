use std::sync::Arc;

use milton_llm::provider::LlmProvider;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::shutdown::ShutdownGuard;
use crate::cognition::StepEvaluator;
use crate::config::SoulCfg;
use crate::io::output::{self, DispatchReceiver, Dispatcher};
use crate::memory::{ScalarStore, SoulMemory, WorkingMemory};
use crate::sensory::{PerceptionReceiver, PerceptionSender, pending};
use crate::soul::{self, Soul};
use crate::types::{AgentId, MemoryEntry, Perception};

/// Snapshot of one agent task, broadcast after every state change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentStatus {
    /// A perception is being handled right now.
    pub thinking: bool,
    /// Perceptions claimed and finished, including aborted and failed ones.
    pub processed: u64,
    /// Fragments spoken by the last finished turn.
    pub last_spoken: usize,
    pub last_aborted: bool,
    pub last_error: Option<String>,
}

/// In-process agent runtime host.
///
/// Each spawned agent is one tokio task that claims perceptions one at a time,
/// which makes invocations single-flight per agent id. Agents share the
/// reasoning providers, the scalar store, and the dispatch channel.
pub struct SoulHost {
    cfg: Arc<SoulCfg>,
    quality: Arc<dyn LlmProvider>,
    vision: Arc<dyn LlmProvider>,
    store: Arc<dyn ScalarStore>,
    dispatch: Dispatcher,
    shutdown: ShutdownGuard,
}

impl SoulHost {
    /// Create a host. Returns the host and the receiver for every agent's
    /// outward events.
    pub fn new(
        cfg: Arc<SoulCfg>,
        quality: Arc<dyn LlmProvider>,
        vision: Arc<dyn LlmProvider>,
        store: Arc<dyn ScalarStore>,
    ) -> (Self, DispatchReceiver) {
        let (dispatch, rx) = output::channel(AgentId::new(cfg.agent_id.clone()));
        let host = Self {
            cfg,
            quality,
            vision,
            store,
            dispatch,
            shutdown: ShutdownGuard::new(),
        };
        (host, rx)
    }

    pub fn cfg(&self) -> &SoulCfg {
        &self.cfg
    }

    /// Cancelled on SIGTERM/SIGINT once [`SoulHost::spawn_signal_listener`]
    /// runs, or by the caller.
    pub fn token(&self) -> CancellationToken {
        self.shutdown.token()
    }

    pub fn spawn_signal_listener(&self) {
        self.shutdown.spawn_signal_listener();
    }

    /// Spawn an agent starting from the blueprint-only memory.
    pub fn spawn_agent(&self, agent: AgentId) -> AgentHandle {
        self.spawn_agent_with_memory(agent, soul::initial_memory(&self.cfg))
    }

    pub fn spawn_agent_with_memory(&self, agent: AgentId, memory: WorkingMemory) -> AgentHandle {
        let dispatch = self.dispatch.for_agent(agent.clone());
        let soul = Soul::new(
            &self.cfg,
            StepEvaluator::new(self.quality.clone(), self.vision.clone(), &self.cfg),
            SoulMemory::new(self.store.clone(), agent.clone(), &self.cfg),
            dispatch,
        );
        let (queue, inbox) = pending::channel();
        let (memory_tx, memory_rx) = watch::channel(memory.clone());
        let (status_tx, status_rx) = watch::channel(AgentStatus::default());
        let cancel = self.shutdown.child();

        tracing::info!(%agent, "agent spawned");
        let task = tokio::spawn(run_agent(
            soul,
            inbox,
            memory,
            memory_tx,
            status_tx,
            cancel.clone(),
        ));

        AgentHandle { agent, queue, memory_rx, status_rx, cancel, task }
    }
}

/// Caller's side of one agent task.
pub struct AgentHandle {
    agent: AgentId,
    queue: PerceptionSender,
    memory_rx: watch::Receiver<WorkingMemory>,
    status_rx: watch::Receiver<AgentStatus>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl AgentHandle {
    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    /// Enqueue a perception. Never blocks; the queue is unbounded.
    pub fn perceive(&self, perception: Perception) {
        tracing::debug!(agent = %self.agent, action = %perception.action, "perception queued");
        if self.queue.send(perception).is_err() {
            tracing::warn!(agent = %self.agent, "agent task has stopped, perception dropped");
        }
    }

    /// The canonical memory as of the last finished turn.
    pub fn memory(&self) -> WorkingMemory {
        self.memory_rx.borrow().clone()
    }

    pub fn status(&self) -> AgentStatus {
        self.status_rx.borrow().clone()
    }

    /// Wait until at least `n` perceptions have been fully handled.
    pub async fn wait_processed(&self, n: u64) -> AgentStatus {
        let mut rx = self.status_rx.clone();
        match rx.wait_for(|s| s.processed >= n).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(),
        }
    }

    /// Stop claiming perceptions and wait for the task. A turn already in
    /// flight runs to completion first.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(agent = %self.agent, error = %e, "agent task ended abnormally");
        }
    }
}

async fn run_agent(
    soul: Soul,
    mut inbox: PerceptionReceiver,
    mut canonical: WorkingMemory,
    memory_tx: watch::Sender<WorkingMemory>,
    status_tx: watch::Sender<AgentStatus>,
    cancel: CancellationToken,
) {
    let agent = soul.dispatch().agent().clone();
    loop {
        let perception = tokio::select! {
            _ = cancel.cancelled() => break,
            p = inbox.recv() => match p {
                Some(p) => p,
                None => break,
            },
        };
        status_tx.send_modify(|s| s.thinking = true);

        canonical = canonical.with_memory(MemoryEntry::user(format!(
            "{} perceived {}: {}",
            canonical.soul_name(),
            perception.action,
            perception.content
        )));

        let (spoken, aborted, error) = match soul.handle(canonical.clone(), &perception, &inbox).await {
            Ok(outcome) => {
                let (spoken, aborted) = (outcome.spoken(), outcome.is_aborted());
                let memory = outcome.into_memory();
                canonical = if aborted {
                    tracing::debug!(%agent, spoken, "turn aborted for newer perception");
                    memory
                } else {
                    match soul.summarize(memory.clone()).await {
                        Ok(summarized) => summarized,
                        Err(e) => {
                            tracing::warn!(%agent, error = %e, "summarization failed, keeping memory");
                            memory
                        }
                    }
                };
                (spoken, aborted, None)
            }
            Err(e) => {
                tracing::warn!(%agent, action = %perception.action, error = %e, "perception handling failed");
                (0, false, Some(e.to_string()))
            }
        };

        memory_tx.send_replace(canonical.clone());
        status_tx.send_modify(|s| {
            s.thinking = false;
            s.processed += 1;
            s.last_spoken = spoken;
            s.last_aborted = aborted;
            s.last_error = error;
        });
    }
    tracing::info!(%agent, "agent stopped");
}
