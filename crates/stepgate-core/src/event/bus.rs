//! In-process fan-out of `WorkflowEvent`s.
//!
//! The engine, gate and rollback engine all publish here; the CLI's `run`
//! command subscribes to draw progress. Events are a live view only. The
//! execution log in the store stays the record of what happened.

use stepgate_types::event::WorkflowEvent;
use tokio::sync::broadcast;

/// Broadcast channel shared by every component of one service.
///
/// A subscriber sees events published after it subscribed. One that falls
/// more than `capacity` events behind gets `Lagged` and resumes from the
/// oldest event still buffered.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    /// `capacity` is clamped to at least one slot.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Nobody listening is normal for headless runs, so send errors are dropped.
    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
