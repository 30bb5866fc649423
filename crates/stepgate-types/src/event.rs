//! Event types for the Stepgate event bus.
//!
//! `WorkflowEvent` is broadcast at every user-visible transition so that
//! observers (the CLI follower, log sinks) can react without polling the
//! store. All variants are Clone + Send + Sync for tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::approval::{ApprovalOutcome, ApprovalRequest};
use crate::workflow::WorkflowId;

/// Events emitted while workflows execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowStarted {
        workflow_id: WorkflowId,
        name: String,
        total_steps: usize,
    },

    StepStarted {
        workflow_id: WorkflowId,
        step_index: usize,
        step_id: String,
        attempt: u32,
    },

    StepCompleted {
        workflow_id: WorkflowId,
        step_index: usize,
        step_id: String,
        duration_ms: u64,
    },

    /// A step attempt failed and will be re-attempted.
    StepRetrying {
        workflow_id: WorkflowId,
        step_id: String,
        retry_count: u32,
        error: String,
    },

    /// An approval request is waiting for a decision.
    ApprovalRequested { request: ApprovalRequest },

    ApprovalResolved {
        workflow_id: WorkflowId,
        request_id: Uuid,
        outcome: ApprovalOutcome,
    },

    WorkflowCompleted { workflow_id: WorkflowId },

    WorkflowFailed {
        workflow_id: WorkflowId,
        failed_step: usize,
        error: String,
    },

    RollbackCompleted {
        workflow_id: WorkflowId,
        compensated: usize,
        failed: usize,
    },
}

impl WorkflowEvent {
    /// The workflow this event belongs to.
    pub fn workflow_id(&self) -> WorkflowId {
        match self {
            WorkflowEvent::WorkflowStarted { workflow_id, .. }
            | WorkflowEvent::StepStarted { workflow_id, .. }
            | WorkflowEvent::StepCompleted { workflow_id, .. }
            | WorkflowEvent::StepRetrying { workflow_id, .. }
            | WorkflowEvent::ApprovalResolved { workflow_id, .. }
            | WorkflowEvent::WorkflowCompleted { workflow_id }
            | WorkflowEvent::WorkflowFailed { workflow_id, .. }
            | WorkflowEvent::RollbackCompleted { workflow_id, .. } => *workflow_id,
            WorkflowEvent::ApprovalRequested { request } => request.workflow_id,
        }
    }

    /// Whether no further events will follow for this workflow.
    ///
    /// A failed workflow is always followed by its rollback, so only
    /// completion and rollback end the stream.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            WorkflowEvent::WorkflowCompleted { .. } | WorkflowEvent::RollbackCompleted { .. }
        )
    }
}
