//! Slack-compatible incoming-webhook notifier.

use std::time::Duration;

use serde_json::json;
use stepgate_core::notify::{Notifier, NotifyError};
use stepgate_types::approval::{ApprovalRequest, ApprovalResponse};
use stepgate_types::workflow::Workflow;

/// Posts `{"text": ...}` to an incoming webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self, NotifyError> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| NotifyError::Config(format!("invalid webhook url: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Config(format!("failed to create http client: {e}")))?;
        Ok(Self { client, url })
    }

    async fn post(&self, text: String) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "webhook rejected notification");
            return Err(NotifyError::Delivery(format!("webhook returned {status}")));
        }
        Ok(())
    }
}

fn approval_requested_text(request: &ApprovalRequest) -> String {
    let name = |key: &str| {
        request
            .metadata
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string()
    };
    format!(
        ":bell: *Approval required*\nWorkflow: {}\nStep: {}\nLevel: {}\nRequest: `{}`\nExpires: {}",
        name("workflow_name"),
        name("step_name"),
        request.approval_level,
        request.id,
        request.timeout_at.to_rfc3339(),
    )
}

fn approval_resolved_text(request: &ApprovalRequest, response: &ApprovalResponse) -> String {
    format!(
        ":white_check_mark: *Approval decision*\nRequest: `{}`\nDecision: {}\nBy: {}\nComment: {}{}",
        request.id,
        response.action.to_string().to_uppercase(),
        response.approver,
        response.comment.as_deref().unwrap_or("none"),
        if response.late { "\n_(arrived after the request closed)_" } else { "" },
    )
}

fn rollback_text(workflow: &Workflow, reason: &str) -> String {
    format!(
        ":leftwards_arrow_with_hook: *Rollback executed*\nWorkflow: {} (`{}`)\nReason: {}\nSteps reached: {}",
        workflow.name, workflow.id, reason, workflow.current_step + 1,
    )
}

fn completed_text(workflow: &Workflow) -> String {
    format!(
        ":tada: *Workflow completed*\nWorkflow: {} (`{}`)\nSteps: {}",
        workflow.name,
        workflow.id,
        workflow.steps.len(),
    )
}

impl Notifier for WebhookNotifier {
    async fn notify_approval_requested(&self, request: &ApprovalRequest) -> Result<(), NotifyError> {
        self.post(approval_requested_text(request)).await
    }

    async fn notify_approval_resolved(
        &self,
        request: &ApprovalRequest,
        response: &ApprovalResponse,
    ) -> Result<(), NotifyError> {
        self.post(approval_resolved_text(request, response)).await
    }

    async fn notify_rollback_executed(&self, workflow: &Workflow, reason: &str) -> Result<(), NotifyError> {
        self.post(rollback_text(workflow, reason)).await
    }

    async fn notify_workflow_completed(&self, workflow: &Workflow) -> Result<(), NotifyError> {
        self.post(completed_text(workflow)).await
    }
}
