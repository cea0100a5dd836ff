use tokio::sync::mpsc;

use crate::types::Perception;

/// Sender half of an agent's perception queue. The host pushes here.
pub type PerceptionSender = mpsc::UnboundedSender<Perception>;
/// Receiver half. The agent task claims from it; the handler inspects what is
/// still queued.
pub type PerceptionReceiver = mpsc::UnboundedReceiver<Perception>;

/// Create an unbounded, ordered perception queue for one agent.
pub fn channel() -> (PerceptionSender, PerceptionReceiver) {
    mpsc::unbounded_channel()
}

/// Read-only view of perceptions that arrived while the soul was thinking.
///
/// Implementations must answer from current state on every call; the
/// interruption rule depends on seeing perceptions that arrived during the
/// last suspension.
pub trait PendingPerceptions: Send + Sync {
    fn pending_count(&self) -> usize;
}

/// A fixed snapshot, for callers that already hold the pending list.
impl PendingPerceptions for Vec<Perception> {
    fn pending_count(&self) -> usize {
        self.len()
    }
}

/// Everything queued but not yet claimed.
impl PendingPerceptions for PerceptionReceiver {
    fn pending_count(&self) -> usize {
        self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn snapshot_vec_is_an_inspector() {
        let empty: Vec<Perception> = vec![];
        assert_eq!(empty.pending_count(), 0);
        assert_eq!(vec![Perception::describe_object("x")].pending_count(), 1);
    }

    #[tokio::test]
    async fn receiver_counts_unclaimed_perceptions() {
        let (tx, mut rx) = channel();
        tx.send(Perception::describe_object("first")).unwrap();
        tx.send(Perception::describe_object("second")).unwrap();
        assert_eq!(rx.pending_count(), 2);

        assert_eq!(rx.recv().await.unwrap().content, "first");
        let view: &dyn PendingPerceptions = &rx;
        assert_eq!(view.pending_count(), 1);
    }

    #[tokio::test]
    async fn inspector_sees_sends_from_cloned_senders() {
        let (tx, rx) = channel();
        let view: &dyn PendingPerceptions = &rx;
        assert_eq!(view.pending_count(), 0);
        tx.clone().send(Perception::describe_object("late")).unwrap();
        assert_eq!(view.pending_count(), 1);
    }

    #[tokio::test]
    async fn recv_waits_for_send() {
        let (tx, mut rx) = channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(Perception::describe_object("arrived")).unwrap();
        });
        let p = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(p.content, "arrived");
        assert_eq!(rx.pending_count(), 0);
    }
}
