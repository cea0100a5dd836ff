use tokio::sync::mpsc;

use crate::types::AgentId;

/// An outward event from a soul to its host/UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// One spoken fragment.
    Says { agent: AgentId, text: String },
    /// Debug log line, mirrored from tracing.
    Log { agent: AgentId, text: String },
}

impl DispatchEvent {
    pub fn agent(&self) -> &AgentId {
        match self {
            Self::Says { agent, .. } | Self::Log { agent, .. } => agent,
        }
    }
}

/// Receiving end, drained by the host or UI.
pub type DispatchReceiver = mpsc::UnboundedReceiver<DispatchEvent>;

/// Fire-and-forget sink for one agent's outward events.
///
/// Sends never block and never fail the caller; a closed listener only
/// means nobody is watching.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    agent: AgentId,
    tx: mpsc::UnboundedSender<DispatchEvent>,
}

impl Dispatcher {
    /// Same channel, different agent.
    pub fn for_agent(&self, agent: AgentId) -> Self {
        Self { agent, tx: self.tx.clone() }
    }

    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    /// Emit one spoken fragment. Fragments are delivered in call order.
    pub fn speak(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::info!(agent = %self.agent, text = %text, "says");
        self.send(DispatchEvent::Says { agent: self.agent.clone(), text });
    }

    pub fn log(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::debug!(agent = %self.agent, "{text}");
        self.send(DispatchEvent::Log { agent: self.agent.clone(), text });
    }

    fn send(&self, event: DispatchEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!(agent = %self.agent, "dispatch listener closed");
        }
    }
}

/// Create a dispatch channel whose first sender speaks for `agent`.
pub fn channel(agent: AgentId) -> (Dispatcher, DispatchReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Dispatcher { agent, tx }, rx)
}

/// Drain everything currently queued, keeping only spoken text.
pub fn drain_says(rx: &mut DispatchReceiver) -> Vec<String> {
    let mut says = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let DispatchEvent::Says { text, .. } = event {
            says.push(text);
        }
    }
    says
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speak_and_log_arrive_in_order() {
        let (tx, mut rx) = channel(AgentId::new("a"));
        tx.speak("one");
        tx.log("debug line");
        tx.speak("two");
        assert_eq!(rx.try_recv().unwrap(), DispatchEvent::Says { agent: AgentId::new("a"), text: "one".into() });
        assert!(matches!(rx.try_recv().unwrap(), DispatchEvent::Log { .. }));
        assert_eq!(drain_says(&mut rx), ["two"]);
    }

    #[test]
    fn duplicates_are_not_collapsed() {
        let (tx, mut rx) = channel(AgentId::new("a"));
        tx.speak("same");
        tx.speak("same");
        assert_eq!(drain_says(&mut rx), ["same", "same"]);
    }

    #[test]
    fn closed_listener_is_ignored() {
        let (tx, rx) = channel(AgentId::new("a"));
        drop(rx);
        tx.speak("nobody hears this");
    }

    #[test]
    fn for_agent_shares_the_channel() {
        let (tx, mut rx) = channel(AgentId::new("a"));
        tx.for_agent(AgentId::new("b")).speak("hi");
        assert_eq!(rx.try_recv().unwrap().agent(), &AgentId::new("b"));
    }
}
