//! Notifier implementations.
//!
//! `LogNotifier` renders every notification as a structured tracing event.
//! `WebhookNotifier` posts a Slack-compatible payload. `ConfiguredNotifier`
//! combines the two according to `NotificationConfig`.

pub mod log;
pub mod webhook;

use stepgate_core::notify::{Notifier, NotifyError};
use stepgate_types::approval::{ApprovalRequest, ApprovalResponse};
use stepgate_types::config::NotificationConfig;
use stepgate_types::workflow::Workflow;

pub use log::LogNotifier;
pub use webhook::WebhookNotifier;

/// Always logs; also posts to the webhook when one is configured.
pub struct ConfiguredNotifier {
    log: LogNotifier,
    webhook: Option<WebhookNotifier>,
}

impl ConfiguredNotifier {
    /// Build from config. An unusable webhook URL is reported and skipped.
    pub fn from_config(config: &NotificationConfig) -> Self {
        let webhook = config
            .webhook_url
            .as_deref()
            .and_then(|url| match WebhookNotifier::new(url) {
                Ok(w) => Some(w),
                Err(e) => {
                    tracing::warn!(error = %e, "webhook notifications disabled");
                    None
                }
            });
        Self {
            log: LogNotifier,
            webhook,
        }
    }

    pub fn has_webhook(&self) -> bool {
        self.webhook.is_some()
    }
}

impl Notifier for ConfiguredNotifier {
    async fn notify_approval_requested(&self, request: &ApprovalRequest) -> Result<(), NotifyError> {
        self.log.notify_approval_requested(request).await?;
        match &self.webhook {
            Some(w) => w.notify_approval_requested(request).await,
            None => Ok(()),
        }
    }

    async fn notify_approval_resolved(
        &self,
        request: &ApprovalRequest,
        response: &ApprovalResponse,
    ) -> Result<(), NotifyError> {
        self.log.notify_approval_resolved(request, response).await?;
        match &self.webhook {
            Some(w) => w.notify_approval_resolved(request, response).await,
            None => Ok(()),
        }
    }

    async fn notify_rollback_executed(&self, workflow: &Workflow, reason: &str) -> Result<(), NotifyError> {
        self.log.notify_rollback_executed(workflow, reason).await?;
        match &self.webhook {
            Some(w) => w.notify_rollback_executed(workflow, reason).await,
            None => Ok(()),
        }
    }

    async fn notify_workflow_completed(&self, workflow: &Workflow) -> Result<(), NotifyError> {
        self.log.notify_workflow_completed(workflow).await?;
        match &self.webhook {
            Some(w) => w.notify_workflow_completed(workflow).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_only_when_configured() {
        let notifier = ConfiguredNotifier::from_config(&NotificationConfig::default());
        assert!(!notifier.has_webhook());

        let notifier = ConfiguredNotifier::from_config(&NotificationConfig {
            webhook_url: Some("https://hooks.example.com/services/T0/B0".to_string()),
        });
        assert!(notifier.has_webhook());

        let notifier = ConfiguredNotifier::from_config(&NotificationConfig {
            webhook_url: Some("not a url".to_string()),
        });
        assert!(!notifier.has_webhook());
    }
}
