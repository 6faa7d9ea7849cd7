//! Side-effect task queue between the state-changing paths and the
//! [`ResolutionOrchestrator`](super::ResolutionOrchestrator).
//!
//! State is persisted first, then a task is enqueued. Tasks carry only the
//! event id and what happened; handlers re-read the event and decide from
//! its audit trail what is still outstanding.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    /// Run the resolution cycle for one attempt
    StartAttempt { attempt: u32 },
    /// Policy or operator escalated the event
    Escalated,
    /// Event entered `rto_triggered`
    ReturnToOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionTask {
    pub event_id: Uuid,
    #[serde(flatten)]
    pub kind: TaskKind,
}

impl ResolutionTask {
    pub fn start_attempt(event_id: Uuid, attempt: u32) -> Self {
        Self {
            event_id,
            kind: TaskKind::StartAttempt { attempt },
        }
    }

    pub fn escalated(event_id: Uuid) -> Self {
        Self {
            event_id,
            kind: TaskKind::Escalated,
        }
    }

    pub fn return_to_origin(event_id: Uuid) -> Self {
        Self {
            event_id,
            kind: TaskKind::ReturnToOrigin,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            TaskKind::StartAttempt { .. } => "start_attempt",
            TaskKind::Escalated => "escalated",
            TaskKind::ReturnToOrigin => "return_to_origin",
        }
    }
}

/// Sending half of the orchestrator queue. Never blocks the caller.
#[derive(Debug, Clone)]
pub struct ResolutionQueue {
    sender: mpsc::Sender<ResolutionTask>,
}

impl ResolutionQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ResolutionTask>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Enqueue a task. A full queue hands the send to a background task rather
    /// than making the caller wait.
    pub fn dispatch(&self, task: ResolutionTask) {
        match self.sender.try_send(task) {
            Ok(()) => {
                debug!(event_id = %task.event_id, task = task.name(), "Resolution task queued");
            }
            Err(TrySendError::Full(task)) => {
                warn!(
                    event_id = %task.event_id,
                    task = task.name(),
                    "Resolution queue full, deferring enqueue"
                );
                let sender = self.sender.clone();
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move {
                            if sender.send(task).await.is_err() {
                                warn!(event_id = %task.event_id, "Resolution queue closed before deferred enqueue");
                            }
                        });
                    }
                    Err(_) => {
                        warn!(event_id = %task.event_id, "No runtime available, resolution task dropped");
                    }
                }
            }
            Err(TrySendError::Closed(task)) => {
                warn!(
                    event_id = %task.event_id,
                    task = task.name(),
                    "Resolution queue closed, task dropped"
                );
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
