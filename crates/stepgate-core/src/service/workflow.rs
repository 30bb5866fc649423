//! Workflow service: the inbound API over the engine, gate and rollback
//! engine.
//!
//! Wires the components from a store, a notifier and the handler registries,
//! validates workflow definitions, and decides what a manual rollback means
//! for a workflow in each status.

use std::collections::HashSet;
use std::sync::Arc;

use stepgate_types::approval::{
    ApprovalAction, ApprovalDecision, ApprovalRequest, ApprovalResponse,
};
use stepgate_types::config::EngineConfig;
use stepgate_types::event::WorkflowEvent;
use stepgate_types::workflow::{EventType, NewWorkflow, Workflow, WorkflowId, WorkflowStatus};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::notify::{BestEffortNotifier, Notifier};
use crate::repository::Store;
use crate::workflow::approval::ApprovalGate;
use crate::workflow::compensation::CompensationRegistry;
use crate::workflow::engine::{AbortOutcome, WorkflowEngine};
use crate::workflow::error::{EngineError, or_not_found};
use crate::workflow::executor::TaskExecutor;
use crate::workflow::retry::RetryPolicy;
use crate::workflow::rollback::{RollbackEngine, RollbackReport};

/// What `trigger_rollback` did.
#[derive(Debug, Clone)]
pub enum RollbackTrigger {
    /// A live execution was aborted; it rolls itself back.
    Scheduled,
    /// The workflow was rolled back before the call returned.
    Executed(RollbackReport),
}

/// Service orchestrating the full workflow lifecycle.
///
/// Generic over the store and notifier ports so that stepgate-core never
/// depends on stepgate-infra.
pub struct WorkflowService<S: Store, N: Notifier> {
    store: Arc<S>,
    engine: WorkflowEngine<S, N>,
    event_bus: EventBus,
    config: EngineConfig,
}

impl<S: Store, N: Notifier + 'static> WorkflowService<S, N> {
    pub fn new(
        store: Arc<S>,
        notifier: Arc<N>,
        executor: TaskExecutor,
        compensations: CompensationRegistry,
        config: EngineConfig,
    ) -> Self {
        let missing: Vec<String> = executor
            .missing_handlers()
            .iter()
            .map(ToString::to_string)
            .collect();
        if !missing.is_empty() {
            tracing::warn!(action_types = ?missing, "no task handler registered, generic handler will be used");
        }
        let missing: Vec<String> = compensations
            .missing_handlers()
            .iter()
            .map(ToString::to_string)
            .collect();
        if !missing.is_empty() {
            tracing::warn!(action_types = ?missing, "no compensation registered, generic rollback will be used");
        }

        let event_bus = EventBus::new(config.event_bus_capacity);
        let notifier = BestEffortNotifier::new(notifier, config.notify_timeout());
        let gate = Arc::new(ApprovalGate::new(
            Arc::clone(&store),
            notifier.clone(),
            event_bus.clone(),
        ));
        let rollback = Arc::new(RollbackEngine::new(
            Arc::clone(&store),
            notifier.clone(),
            event_bus.clone(),
            Arc::new(compensations),
            config.rollback_log_tail,
        ));
        let engine = WorkflowEngine::new(
            Arc::clone(&store),
            gate,
            rollback,
            Arc::new(executor),
            notifier,
            event_bus.clone(),
            RetryPolicy::from_config(&config),
        );

        Self {
            store,
            engine,
            event_bus,
            config,
        }
    }

    pub fn engine(&self) -> &WorkflowEngine<S, N> {
        &self.engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Live stream of engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.event_bus.subscribe()
    }

    /// Validate a definition and persist it as a `Pending` workflow.
    pub async fn create_workflow(&self, draft: NewWorkflow) -> Result<Workflow, EngineError> {
        validate_draft(&draft)?;

        let workflow = Workflow::from_draft(draft, &self.config);
        self.store.save_workflow(&workflow).await?;

        tracing::info!(
            workflow_id = %workflow.id,
            name = %workflow.name,
            steps = workflow.steps.len(),
            "workflow created"
        );
        Ok(workflow)
    }

    /// Start a `Pending` workflow. See [`WorkflowEngine::start`].
    pub async fn start_workflow(&self, workflow_id: WorkflowId) -> Result<JoinHandle<()>, EngineError> {
        self.engine.start(workflow_id).await
    }

    pub async fn submit_approval_decision(
        &self,
        request_id: Uuid,
        action: ApprovalAction,
        approver: &str,
        comment: Option<&str>,
    ) -> Result<ApprovalResponse, EngineError> {
        let approver = approver.trim();
        if approver.is_empty() {
            return Err(EngineError::Validation("approver cannot be empty".to_string()));
        }
        let decision = ApprovalDecision {
            action,
            approver: approver.to_string(),
            comment: comment.map(str::to_owned),
        };
        self.engine.gate().submit_decision(request_id, decision).await
    }

    /// Roll a workflow back on operator request.
    ///
    /// A live execution is aborted and rolls itself back; one whose steps
    /// all succeeded is completing and is rejected like `Completed`. A `Failed`
    /// workflow, or an active record with no live execution (left behind by
    /// a crash), is compensated immediately. Every other status is rejected.
    pub async fn trigger_rollback(
        &self,
        workflow_id: WorkflowId,
        reason: &str,
    ) -> Result<RollbackTrigger, EngineError> {
        match self.engine.abort(&workflow_id, reason) {
            AbortOutcome::Aborted => return Ok(RollbackTrigger::Scheduled),
            AbortOutcome::Completing => {
                return Err(EngineError::Validation(format!(
                    "workflow {workflow_id} is completing and cannot be rolled back"
                )));
            }
            AbortOutcome::NotRunning => {}
        }

        let workflow = self.get_workflow(workflow_id).await?;
        match workflow.status {
            WorkflowStatus::Failed => {}
            status if status.is_active() => self.fail_orphan(&workflow, reason).await?,
            status => {
                return Err(EngineError::Validation(format!(
                    "workflow {workflow_id} is {status} and cannot be rolled back"
                )));
            }
        }

        let report = self
            .engine
            .rollback_engine()
            .execute_rollback(workflow_id, reason)
            .await?;
        Ok(RollbackTrigger::Executed(report))
    }

    /// Move a `Pending` workflow to `Cancelled`.
    pub async fn cancel_workflow(&self, workflow_id: WorkflowId, reason: &str) -> Result<Workflow, EngineError> {
        let mut rejection = None;
        let workflow = self
            .store
            .update_workflow(&workflow_id, |wf| match wf.transition(WorkflowStatus::Cancelled) {
                Ok(()) => {
                    wf.completed_at = Some(chrono::Utc::now());
                    wf.log(
                        EventType::WorkflowCancelled,
                        None,
                        serde_json::json!({ "reason": reason }),
                    );
                }
                Err(_) => {
                    rejection = Some(format!(
                        "workflow {} is {}, only pending workflows can be cancelled",
                        wf.id, wf.status
                    ));
                }
            })
            .await
            .map_err(or_not_found(format!("workflow {workflow_id}")))?;

        if let Some(msg) = rejection {
            return Err(EngineError::Validation(msg));
        }
        tracing::info!(workflow_id = %workflow_id, reason, "workflow cancelled");
        Ok(workflow)
    }

    pub async fn get_pending_approvals(&self) -> Result<Vec<ApprovalRequest>, EngineError> {
        self.engine.gate().pending_approvals().await
    }

    pub async fn get_approval_request(&self, request_id: Uuid) -> Result<ApprovalRequest, EngineError> {
        self.store
            .get_approval_request(&request_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("approval request {request_id}")))
    }

    /// Every response recorded for a request, late ones included.
    pub async fn approval_responses(&self, request_id: Uuid) -> Result<Vec<ApprovalResponse>, EngineError> {
        Ok(self.store.list_approval_responses(&request_id).await?)
    }

    pub async fn get_workflow(&self, workflow_id: WorkflowId) -> Result<Workflow, EngineError> {
        self.store
            .get_workflow(&workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("workflow {workflow_id}")))
    }

    /// All workflows, newest first.
    pub async fn list_workflows(&self) -> Result<Vec<Workflow>, EngineError> {
        Ok(self.store.list_workflows().await?)
    }

    /// Spawn the approval timeout sweeper. It stops when `shutdown` fires.
    pub fn spawn_background(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        Arc::clone(self.engine.gate()).spawn_sweeper(self.config.sweep_interval(), shutdown)
    }

    /// Cancel the leftover approvals of an active record with no live run
    /// and mark it failed so it can be compensated.
    async fn fail_orphan(&self, workflow: &Workflow, reason: &str) -> Result<(), EngineError> {
        let gate = self.engine.gate();
        for request in gate.pending_approvals().await? {
            if request.workflow_id != workflow.id {
                continue;
            }
            if let Err(e) = gate.cancel_request(request.id).await {
                tracing::warn!(request_id = %request.id, error = %e, "failed to cancel orphaned approval");
            }
        }

        let mut failed = false;
        self.store
            .update_workflow(&workflow.id, |wf| {
                if wf.transition(WorkflowStatus::Failed).is_ok() {
                    wf.log(
                        EventType::WorkflowFailed,
                        None,
                        serde_json::json!({
                            "failed_step": wf.current_step,
                            "error": reason,
                            "orphaned": true,
                        }),
                    );
                    failed = true;
                }
            })
            .await?;

        if !failed {
            return Err(EngineError::Concurrency(format!(
                "workflow {} changed status during rollback",
                workflow.id
            )));
        }
        tracing::warn!(workflow_id = %workflow.id, reason, "orphaned workflow marked failed");
        Ok(())
    }
}

/// Structural checks on a definition before it is persisted.
pub fn validate_draft(draft: &NewWorkflow) -> Result<(), EngineError> {
    if draft.name.trim().is_empty() {
        return Err(EngineError::Validation("workflow name cannot be empty".to_string()));
    }
    if draft.steps.is_empty() {
        return Err(EngineError::Validation(format!(
            "workflow '{}' must have at least one step",
            draft.name
        )));
    }

    let mut seen = HashSet::new();
    for step in &draft.steps {
        if step.id.trim().is_empty() {
            return Err(EngineError::Validation("step id cannot be empty".to_string()));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(EngineError::Validation(format!("duplicate step id '{}'", step.id)));
        }
        if step.action_type.trim().is_empty() {
            return Err(EngineError::Validation(format!(
                "step '{}' has an empty action_type",
                step.id
            )));
        }
        if step.timeout_secs == Some(0) {
            return Err(EngineError::Validation(format!(
                "step '{}' timeout must be greater than zero",
                step.id
            )));
        }
        if step.requires_approval && step.approval_level == 0 {
            return Err(EngineError::Validation(format!(
                "step '{}' approval_level must be at least 1",
                step.id
            )));
        }
    }
    Ok(())
}
