//! Notifier that writes to the tracing pipeline.

use stepgate_core::notify::{Notifier, NotifyError};
use stepgate_types::approval::{ApprovalRequest, ApprovalResponse};
use stepgate_types::workflow::Workflow;

/// Renders notifications as `info`-level tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

fn meta_str<'a>(request: &'a ApprovalRequest, key: &str) -> &'a str {
    request
        .metadata
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
}

impl Notifier for LogNotifier {
    async fn notify_approval_requested(&self, request: &ApprovalRequest) -> Result<(), NotifyError> {
        tracing::info!(
            request_id = %request.id,
            workflow_id = %request.workflow_id,
            workflow = meta_str(request, "workflow_name"),
            step = meta_str(request, "step_name"),
            approval_level = request.approval_level,
            timeout_at = %request.timeout_at,
            "approval required"
        );
        Ok(())
    }

    async fn notify_approval_resolved(
        &self,
        request: &ApprovalRequest,
        response: &ApprovalResponse,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            request_id = %request.id,
            workflow_id = %request.workflow_id,
            decision = %response.action,
            approver = %response.approver,
            comment = response.comment.as_deref().unwrap_or("none"),
            late = response.late,
            "approval decision recorded"
        );
        Ok(())
    }

    async fn notify_rollback_executed(&self, workflow: &Workflow, reason: &str) -> Result<(), NotifyError> {
        tracing::info!(
            workflow_id = %workflow.id,
            workflow = %workflow.name,
            reason,
            current_step = workflow.current_step,
            "rollback executed"
        );
        Ok(())
    }

    async fn notify_workflow_completed(&self, workflow: &Workflow) -> Result<(), NotifyError> {
        tracing::info!(
            workflow_id = %workflow.id,
            workflow = %workflow.name,
            steps = workflow.steps.len(),
            completed_at = ?workflow.completed_at,
            "workflow completed"
        );
        Ok(())
    }
}
