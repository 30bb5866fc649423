//! Rollback engine: compensates a failed workflow in strict LIFO order.
//!
//! Compensation is best-effort. A failing handler is logged and skipped, the
//! sweep always visits every step from `current_step` down to 0, and the
//! workflow always ends `RolledBack`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use stepgate_types::event::WorkflowEvent;
use stepgate_types::workflow::{
    EventType, ExecutionLogEntry, RollbackSnapshot, Workflow, WorkflowId, WorkflowStatus,
};

use crate::event::EventBus;
use crate::notify::{BestEffortNotifier, Notifier};
use crate::repository::Store;

use super::compensation::CompensationRegistry;
use super::error::EngineError;
use super::handler::{ActionType, CompensationContext};

/// What happened to one step during a rollback sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CompensationAction {
    Executed { handler: String },
    /// Approval-gated steps have no side effect to undo.
    Skipped,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompensationRecord {
    pub step_index: usize,
    pub step_id: String,
    #[serde(flatten)]
    pub action: CompensationAction,
}

/// Outcome of [`RollbackEngine::execute_rollback`], in visit order.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub workflow_id: WorkflowId,
    pub reason: String,
    pub visited: Vec<CompensationRecord>,
}

impl RollbackReport {
    pub fn compensated(&self) -> usize {
        self.count(|a| matches!(a, CompensationAction::Executed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|a| matches!(a, CompensationAction::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|a| matches!(a, CompensationAction::Skipped))
    }

    /// Step indices in the order they were visited.
    pub fn order(&self) -> Vec<usize> {
        self.visited.iter().map(|r| r.step_index).collect()
    }

    fn count(&self, pred: impl Fn(&CompensationAction) -> bool) -> usize {
        self.visited.iter().filter(|r| pred(&r.action)).count()
    }
}

/// Removes the in-progress marker on drop, including on early return.
struct InProgressGuard<'a> {
    map: &'a DashMap<WorkflowId, ()>,
    id: WorkflowId,
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

// ---------------------------------------------------------------------------
// RollbackEngine
// ---------------------------------------------------------------------------

pub struct RollbackEngine<S: Store, N: Notifier> {
    store: Arc<S>,
    notifier: BestEffortNotifier<N>,
    event_bus: EventBus,
    compensations: Arc<CompensationRegistry>,
    in_progress: DashMap<WorkflowId, ()>,
    log_tail: usize,
}

impl<S: Store, N: Notifier + 'static> RollbackEngine<S, N> {
    pub fn new(
        store: Arc<S>,
        notifier: BestEffortNotifier<N>,
        event_bus: EventBus,
        compensations: Arc<CompensationRegistry>,
        log_tail: usize,
    ) -> Self {
        Self {
            store,
            notifier,
            event_bus,
            compensations,
            in_progress: DashMap::new(),
            log_tail,
        }
    }

    /// Whether a rollback for `workflow_id` is running right now.
    pub fn is_in_progress(&self, workflow_id: &WorkflowId) -> bool {
        self.in_progress.contains_key(workflow_id)
    }

    /// Compensate a `Failed` workflow and move it to `RolledBack`.
    ///
    /// Not re-entrant: a concurrent call for the same id, or a call on a
    /// workflow that is already rolled back, fails with `Concurrency`.
    pub async fn execute_rollback(
        &self,
        workflow_id: WorkflowId,
        reason: &str,
    ) -> Result<RollbackReport, EngineError> {
        if self.in_progress.insert(workflow_id, ()).is_some() {
            return Err(EngineError::Concurrency(format!(
                "rollback already in progress for workflow {workflow_id}"
            )));
        }
        let _guard = InProgressGuard {
            map: &self.in_progress,
            id: workflow_id,
        };

        let workflow = self
            .store
            .get_workflow(&workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("workflow {workflow_id}")))?;
        match workflow.status {
            WorkflowStatus::Failed => {}
            WorkflowStatus::RolledBack => {
                return Err(EngineError::Concurrency(format!(
                    "workflow {workflow_id} is already rolled back"
                )));
            }
            other => {
                return Err(EngineError::Validation(format!(
                    "workflow {workflow_id} is {other}, only failed workflows can be rolled back"
                )));
            }
        }

        tracing::info!(workflow_id = %workflow_id, reason, "rollback started");

        let tail = self.log_tail;
        let workflow = self
            .store
            .update_workflow(&workflow_id, |wf| {
                wf.rollback_data = Some(RollbackSnapshot::capture(wf, tail));
                wf.log(
                    EventType::RollbackStarted,
                    None,
                    serde_json::json!({ "reason": reason, "from_step": wf.current_step }),
                );
            })
            .await?;

        let mut report = RollbackReport {
            workflow_id,
            reason: reason.to_string(),
            visited: Vec::new(),
        };

        if let Some(last) = workflow.steps.len().checked_sub(1) {
            let start = workflow.current_step.min(last);
            for index in (0..=start).rev() {
                let record = self.compensate_step(&workflow, index, reason).await;
                report.visited.push(record);
            }
        }

        let summary = serde_json::json!({
            "reason": reason,
            "compensated": report.compensated(),
            "failed": report.failed(),
            "skipped": report.skipped(),
        });
        let workflow = self
            .store
            .update_workflow(&workflow_id, |wf| {
                if let Err(e) = wf.transition(WorkflowStatus::RolledBack) {
                    tracing::warn!(workflow_id = %wf.id, error = %e, "forcing rolled_back status");
                    wf.status = WorkflowStatus::RolledBack;
                }
                wf.log(EventType::RollbackCompleted, None, summary);
            })
            .await?;

        tracing::info!(
            workflow_id = %workflow_id,
            compensated = report.compensated(),
            failed = report.failed(),
            skipped = report.skipped(),
            "rollback completed"
        );

        self.notifier.rollback_executed(&workflow, reason).await;
        self.event_bus.publish(WorkflowEvent::RollbackCompleted {
            workflow_id,
            compensated: report.compensated(),
            failed: report.failed(),
        });

        Ok(report)
    }

    async fn compensate_step(&self, workflow: &Workflow, index: usize, reason: &str) -> CompensationRecord {
        let step = &workflow.steps[index];

        let (action, entry) = if step.requires_approval {
            (
                CompensationAction::Skipped,
                ExecutionLogEntry::new(
                    EventType::CompensationSkipped,
                    Some(&step.id),
                    serde_json::json!({ "step_index": index, "reason": "approval step" }),
                ),
            )
        } else {
            let handler = self
                .compensations
                .resolve(&ActionType::from(step.action_type.as_str()));
            let ctx = CompensationContext {
                workflow_id: workflow.id,
                step_index: index,
                step: step.clone(),
                metadata: workflow.metadata.clone(),
                reason: reason.to_string(),
            };
            let limit = Duration::from_secs(step.timeout_secs.max(1));

            match tokio::time::timeout(limit, handler.compensate(&ctx)).await {
                Ok(Ok(result)) => (
                    CompensationAction::Executed {
                        handler: handler.name().to_string(),
                    },
                    ExecutionLogEntry::new(
                        EventType::CompensationExecuted,
                        Some(&step.id),
                        serde_json::json!({
                            "step_index": index,
                            "handler": handler.name(),
                            "result": result,
                        }),
                    ),
                ),
                Ok(Err(e)) => self.failed(index, &step.id, e.to_string()),
                Err(_) => self.failed(
                    index,
                    &step.id,
                    format!("compensation timed out after {limit:?}"),
                ),
            }
        };

        if let Err(e) = self.store.append_log(&workflow.id, &entry).await {
            tracing::warn!(workflow_id = %workflow.id, step_index = index, error = %e, "failed to log compensation");
        }

        CompensationRecord {
            step_index: index,
            step_id: step.id.clone(),
            action,
        }
    }

    fn failed(&self, index: usize, step_id: &str, error: String) -> (CompensationAction, ExecutionLogEntry) {
        tracing::warn!(step_index = index, step_id, error = %error, "compensation failed, continuing");
        let entry = ExecutionLogEntry::new(
            EventType::CompensationFailed,
            Some(step_id),
            serde_json::json!({ "step_index": index, "error": error }),
        );
        (CompensationAction::Failed { error }, entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use stepgate_types::config::EngineConfig;
    use stepgate_types::workflow::{NewStep, NewWorkflow};

    use crate::notify::NoopNotifier;
    use crate::repository::WorkflowRepository;
    use crate::repository::memory::InMemoryStore;
    use crate::workflow::error::CompensationError;
    use crate::workflow::handler::CompensationHandler;

    #[derive(Clone, Default)]
    struct Recording {
        calls: Arc<Mutex<Vec<String>>>,
        fail_on: Option<String>,
    }

    impl CompensationHandler for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn compensate(&self, ctx: &CompensationContext) -> Result<serde_json::Value, CompensationError> {
            self.calls.lock().unwrap().push(ctx.step.id.clone());
            if self.fail_on.as_deref() == Some(ctx.step.id.as_str()) {
                return Err(CompensationError::Failed {
                    step_id: ctx.step.id.clone(),
                    message: "boom".to_string(),
                });
            }
            Ok(serde_json::json!({ "undone": ctx.step.id }))
        }
    }

    fn engine(
        store: &InMemoryStore,
        handler: Recording,
    ) -> RollbackEngine<InMemoryStore, NoopNotifier> {
        let registry = CompensationRegistry::new()
            .with_handler(ActionType::ValidateData, handler.clone())
            .with_handler(ActionType::ProcessData, handler.clone())
            .with_handler(ActionType::DeploySystem, handler);
        RollbackEngine::new(
            Arc::new(store.clone()),
            BestEffortNotifier::new(Arc::new(NoopNotifier), Duration::from_secs(1)),
            EventBus::new(16),
            Arc::new(registry),
            10,
        )
    }

    async fn failed_workflow(store: &InMemoryStore, current_step: usize) -> WorkflowId {
        let mut wf = Workflow::from_draft(
            NewWorkflow {
                name: "deploy".to_string(),
                description: None,
                priority: 0,
                metadata: HashMap::new(),
                steps: vec![
                    NewStep::automated("validate", "validate_data"),
                    NewStep::approval("review", 1, 60),
                    NewStep::automated("process", "process_data"),
                    NewStep::automated("deploy", "deploy_system"),
                ],
            },
            &EngineConfig::default(),
        );
        wf.status = WorkflowStatus::Failed;
        wf.current_step = current_step;
        store.save_workflow(&wf).await.unwrap();
        wf.id
    }

    #[tokio::test]
    async fn visits_steps_in_reverse_order() {
        let store = InMemoryStore::new();
        let handler = Recording::default();
        let rollback = engine(&store, handler.clone());
        let id = failed_workflow(&store, 2).await;

        let report = rollback.execute_rollback(id, "manual").await.unwrap();

        assert_eq!(report.order(), vec![2, 1, 0]);
        assert_eq!(report.compensated(), 2);
        assert_eq!(report.skipped(), 1);
        assert_eq!(*handler.calls.lock().unwrap(), vec!["process", "validate"]);

        let wf = store.get_workflow(&id).await.unwrap().unwrap();
        assert_eq!(wf.status, WorkflowStatus::RolledBack);
        assert_eq!(wf.count_events(EventType::RollbackStarted), 1);
        assert_eq!(wf.count_events(EventType::CompensationSkipped), 1);
        assert_eq!(wf.count_events(EventType::RollbackCompleted), 1);
        let snapshot = wf.rollback_data.unwrap();
        assert_eq!(snapshot.status, WorkflowStatus::Failed);
        assert_eq!(snapshot.completed_steps, vec!["validate", "review", "process"]);
    }

    #[tokio::test]
    async fn failing_compensation_does_not_stop_the_sweep() {
        let store = InMemoryStore::new();
        let handler = Recording {
            fail_on: Some("deploy".to_string()),
            ..Recording::default()
        };
        let rollback = engine(&store, handler.clone());
        let id = failed_workflow(&store, 3).await;

        let report = rollback.execute_rollback(id, "deploy failed").await.unwrap();

        assert_eq!(report.failed(), 1);
        assert_eq!(report.compensated(), 2);
        assert_eq!(*handler.calls.lock().unwrap(), vec!["deploy", "process", "validate"]);
        let wf = store.get_workflow(&id).await.unwrap().unwrap();
        assert_eq!(wf.status, WorkflowStatus::RolledBack);
        assert_eq!(wf.count_events(EventType::CompensationFailed), 1);
    }

    #[tokio::test]
    async fn second_rollback_is_a_conflict() {
        let store = InMemoryStore::new();
        let rollback = engine(&store, Recording::default());
        let id = failed_workflow(&store, 0).await;

        rollback.execute_rollback(id, "first").await.unwrap();
        let err = rollback.execute_rollback(id, "second").await.unwrap_err();
        assert!(matches!(err, EngineError::Concurrency(_)));
        assert!(!rollback.is_in_progress(&id));
    }

    #[tokio::test]
    async fn only_failed_workflows_roll_back() {
        let store = InMemoryStore::new();
        let rollback = engine(&store, Recording::default());
        let id = failed_workflow(&store, 0).await;
        store
            .update_workflow_status(&id, WorkflowStatus::Completed, None)
            .await
            .unwrap();

        let err = rollback.execute_rollback(id, "nope").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = rollback
            .execute_rollback(WorkflowId::new(), "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn unregistered_action_uses_generic_compensation() {
        let store = InMemoryStore::new();
        let rollback = RollbackEngine::new(
            Arc::new(store.clone()),
            BestEffortNotifier::new(Arc::new(NoopNotifier), Duration::from_secs(1)),
            EventBus::new(16),
            Arc::new(CompensationRegistry::new()),
            10,
        );
        let id = failed_workflow(&store, 0).await;

        let report = rollback.execute_rollback(id, "generic").await.unwrap();
        assert_eq!(
            report.visited[0].action,
            CompensationAction::Executed {
                handler: "generic_rollback".to_string()
            }
        );
    }
}
