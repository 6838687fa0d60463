//! Workflow notifications for whatever renders the state.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::jobs::{Job, JobKind};

use super::phase::WorkflowPhase;

/// Emitted after every authoritative write.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A job snapshot changed
    JobUpdated { job: Job },
    /// The overall phase of a contract changed
    PhaseChanged {
        subject_id: String,
        phase: WorkflowPhase,
    },
    /// Polling gave up without a terminal status; offer "check again"
    PollingTimedOut {
        subject_id: String,
        kind: JobKind,
        attempts: u32,
    },
}

impl WorkflowEvent {
    pub fn subject_id(&self) -> &str {
        match self {
            WorkflowEvent::JobUpdated { job } => &job.subject_id,
            WorkflowEvent::PhaseChanged { subject_id, .. }
            | WorkflowEvent::PollingTimedOut { subject_id, .. } => subject_id,
        }
    }
}

/// Receives workflow events.
///
/// Called without the controller's lock held, but from the controller's
/// tasks, so implementations should not block.
pub trait WorkflowEmitter: Send + Sync {
    fn emit(&self, event: WorkflowEvent);
}

/// Discards all events.
pub struct NoOpEmitter;

impl WorkflowEmitter for NoOpEmitter {
    fn emit(&self, _event: WorkflowEvent) {}
}

/// Forwards events into an unbounded channel.
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<WorkflowEvent>,
}

impl ChannelEmitter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl WorkflowEmitter for ChannelEmitter {
    fn emit(&self, event: WorkflowEvent) {
        // Receiver gone means nobody is watching; not an error.
        let _ = self.tx.send(event);
    }
}
