//! Notifier port and best-effort delivery wrapper.
//!
//! Notifications are fire-and-forget: a failing or slow notifier must never
//! change a workflow's outcome. `BestEffortNotifier` enforces that by
//! bounding every call with a timeout and downgrading errors to warnings.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use stepgate_types::approval::{ApprovalRequest, ApprovalResponse};
use stepgate_types::workflow::Workflow;

/// Delivery errors reported by a [`Notifier`].
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),

    #[error("notification channel misconfigured: {0}")]
    Config(String),
}

/// Outbound channel for human-readable workflow events.
pub trait Notifier: Send + Sync {
    /// An approval request is waiting for a decision.
    fn notify_approval_requested(
        &self,
        request: &ApprovalRequest,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;

    /// A decision was recorded for `request`.
    fn notify_approval_resolved(
        &self,
        request: &ApprovalRequest,
        response: &ApprovalResponse,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;

    /// A workflow was compensated.
    fn notify_rollback_executed(
        &self,
        workflow: &Workflow,
        reason: &str,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;

    /// A workflow finished successfully.
    fn notify_workflow_completed(
        &self,
        workflow: &Workflow,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// Notifier that does nothing. Useful for tests and headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    async fn notify_approval_requested(&self, _request: &ApprovalRequest) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn notify_approval_resolved(
        &self,
        _request: &ApprovalRequest,
        _response: &ApprovalResponse,
    ) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn notify_rollback_executed(&self, _workflow: &Workflow, _reason: &str) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn notify_workflow_completed(&self, _workflow: &Workflow) -> Result<(), NotifyError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// BestEffortNotifier
// ---------------------------------------------------------------------------

/// Wraps a [`Notifier`] so that calls never fail and never block for longer
/// than `timeout`.
pub struct BestEffortNotifier<N: Notifier> {
    inner: Arc<N>,
    timeout: Duration,
}

impl<N: Notifier> Clone for BestEffortNotifier<N> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            timeout: self.timeout,
        }
    }
}

impl<N: Notifier> BestEffortNotifier<N> {
    pub fn new(inner: Arc<N>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub async fn approval_requested(&self, request: &ApprovalRequest) {
        self.deliver(
            "approval_requested",
            self.inner.notify_approval_requested(request),
        )
        .await;
    }

    pub async fn approval_resolved(&self, request: &ApprovalRequest, response: &ApprovalResponse) {
        self.deliver(
            "approval_resolved",
            self.inner.notify_approval_resolved(request, response),
        )
        .await;
    }

    pub async fn rollback_executed(&self, workflow: &Workflow, reason: &str) {
        self.deliver(
            "rollback_executed",
            self.inner.notify_rollback_executed(workflow, reason),
        )
        .await;
    }

    pub async fn workflow_completed(&self, workflow: &Workflow) {
        self.deliver(
            "workflow_completed",
            self.inner.notify_workflow_completed(workflow),
        )
        .await;
    }

    async fn deliver(
        &self,
        kind: &'static str,
        fut: impl Future<Output = Result<(), NotifyError>>,
    ) {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(())) => tracing::debug!(kind, "notification delivered"),
            Ok(Err(e)) => tracing::warn!(kind, error = %e, "notification failed"),
            Err(_) => tracing::warn!(
                kind,
                timeout_ms = self.timeout.as_millis() as u64,
                "notification timed out"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepgate_types::config::EngineConfig;
    use std::collections::HashMap;
    use stepgate_types::workflow::{NewStep, NewWorkflow};

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        async fn notify_approval_requested(&self, _r: &ApprovalRequest) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("connection refused".to_string()))
        }

        async fn notify_approval_resolved(
            &self,
            _r: &ApprovalRequest,
            _p: &ApprovalResponse,
        ) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("connection refused".to_string()))
        }

        async fn notify_rollback_executed(&self, _w: &Workflow, _r: &str) -> Result<(), NotifyError> {
            std::future::pending::<()>().await;
            Ok(())
        }

        async fn notify_workflow_completed(&self, _w: &Workflow) -> Result<(), NotifyError> {
            Err(NotifyError::Config("no url".to_string()))
        }
    }

    fn sample_workflow() -> Workflow {
        Workflow::from_draft(NewWorkflow {
            name: "n".to_string(),
            description: None,
            priority: 0,
            metadata: HashMap::new(),
            steps: vec![NewStep::automated("a", "generic")],
        }, &EngineConfig::default())
    }

    #[tokio::test]
    async fn errors_are_swallowed() {
        let notifier = BestEffortNotifier::new(Arc::new(FailingNotifier), Duration::from_secs(1));
        notifier.workflow_completed(&sample_workflow()).await;
    }

    #[tokio::test]
    async fn hanging_notifier_is_bounded() {
        let notifier = BestEffortNotifier::new(Arc::new(FailingNotifier), Duration::from_millis(20));
        let started = std::time::Instant::now();
        notifier.rollback_executed(&sample_workflow(), "test").await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn notify_error_display() {
        let err = NotifyError::Delivery("503".to_string());
        assert!(err.to_string().contains("503"));
    }
}
