//! Workflow engine: runs a workflow's steps strictly in order.
//!
//! Each started workflow runs as one spawned tokio task. The active-run
//! registry guarantees at most one execution per workflow id and carries the
//! cancellation token used for manual aborts. Failed steps are retried under
//! the `RetryPolicy`; once a step is exhausted (or the run is aborted) the
//! workflow is marked `Failed` and handed to the `RollbackEngine` exactly once.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use stepgate_types::approval::ApprovalOutcome;
use stepgate_types::event::WorkflowEvent;
use stepgate_types::workflow::{
    EventType, ExecutionLogEntry, Step, Workflow, WorkflowId, WorkflowStatus,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::notify::{BestEffortNotifier, Notifier};
use crate::repository::Store;

use super::approval::ApprovalGate;
use super::error::{EngineError, ExecutionError, or_not_found};
use super::executor::TaskExecutor;
use super::handler::TaskContext;
use super::retry::RetryPolicy;
use super::rollback::RollbackEngine;

// ---------------------------------------------------------------------------
// Active runs
// ---------------------------------------------------------------------------

/// How a run ended up settling. Completion and abort race for it; the first
/// to claim it decides what the run does.
#[derive(Debug, Clone)]
enum Settle {
    Aborted(String),
    Completing,
}

/// Registry entry for a running workflow.
#[derive(Clone, Default)]
struct ActiveRun {
    cancel: CancellationToken,
    settled: Arc<OnceLock<Settle>>,
}

impl ActiveRun {
    fn reason(&self) -> String {
        match self.settled.get() {
            Some(Settle::Aborted(reason)) => reason.clone(),
            _ => "execution aborted".to_string(),
        }
    }

    /// Claim the run for completion. Fails once an abort got there first.
    fn claim_completion(&self) -> bool {
        self.settled.set(Settle::Completing).is_ok()
    }
}

/// What [`WorkflowEngine::abort`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    /// The run was cancelled and will fail and roll itself back.
    Aborted,
    /// Every step already succeeded; the run is completing.
    Completing,
    /// Nothing is running for this workflow in this process.
    NotRunning,
}

/// Result of a single attempt at a step.
enum Attempt {
    Succeeded(serde_json::Value),
    Failed(String),
    /// Stopped by the run's own token, or by an approval cancelled elsewhere.
    Aborted(Option<String>),
    /// The stored workflow is no longer active.
    Superseded(WorkflowStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopKind {
    Exhausted,
    Aborted,
    /// Someone else moved the workflow out of an active status. Nothing left
    /// for this run to persist.
    Superseded,
}

/// Why the step loop stopped short of completion.
struct StepFailure {
    step_index: usize,
    error: String,
    kind: StopKind,
}

impl StepFailure {
    fn failed(step_index: usize, error: impl Into<String>) -> Self {
        Self {
            step_index,
            error: error.into(),
            kind: StopKind::Exhausted,
        }
    }

    fn aborted(step_index: usize, run: &ActiveRun) -> Self {
        Self::interrupted(step_index, run.reason())
    }

    fn interrupted(step_index: usize, reason: String) -> Self {
        Self {
            step_index,
            error: reason,
            kind: StopKind::Aborted,
        }
    }

    fn superseded(step_index: usize, status: WorkflowStatus) -> Self {
        Self {
            step_index,
            error: format!("workflow is {status}"),
            kind: StopKind::Superseded,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

pub struct WorkflowEngine<S: Store, N: Notifier> {
    store: Arc<S>,
    gate: Arc<ApprovalGate<S, N>>,
    rollback: Arc<RollbackEngine<S, N>>,
    executor: Arc<TaskExecutor>,
    notifier: BestEffortNotifier<N>,
    event_bus: EventBus,
    policy: RetryPolicy,
    active: Arc<DashMap<WorkflowId, ActiveRun>>,
}

impl<S: Store, N: Notifier> Clone for WorkflowEngine<S, N> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            gate: Arc::clone(&self.gate),
            rollback: Arc::clone(&self.rollback),
            executor: Arc::clone(&self.executor),
            notifier: self.notifier.clone(),
            event_bus: self.event_bus.clone(),
            policy: self.policy,
            active: Arc::clone(&self.active),
        }
    }
}

impl<S: Store, N: Notifier + 'static> WorkflowEngine<S, N> {
    pub fn new(
        store: Arc<S>,
        gate: Arc<ApprovalGate<S, N>>,
        rollback: Arc<RollbackEngine<S, N>>,
        executor: Arc<TaskExecutor>,
        notifier: BestEffortNotifier<N>,
        event_bus: EventBus,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            gate,
            rollback,
            executor,
            notifier,
            event_bus,
            policy,
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn gate(&self) -> &Arc<ApprovalGate<S, N>> {
        &self.gate
    }

    pub fn rollback_engine(&self) -> &Arc<RollbackEngine<S, N>> {
        &self.rollback
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Whether an execution for `workflow_id` is live in this process.
    pub fn is_active(&self, workflow_id: &WorkflowId) -> bool {
        self.active.contains_key(workflow_id)
    }

    /// Move a `Pending` workflow to `Running` and spawn its step loop.
    ///
    /// The returned handle resolves once the run has completed or finished
    /// rolling back; callers are free to drop it.
    pub async fn start(&self, workflow_id: WorkflowId) -> Result<JoinHandle<()>, EngineError> {
        let run = ActiveRun::default();
        match self.active.entry(workflow_id) {
            Entry::Occupied(_) => {
                return Err(EngineError::Concurrency(format!(
                    "workflow {workflow_id} is already running"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(run.clone());
            }
        }

        let workflow = match self.prepare(workflow_id).await {
            Ok(workflow) => workflow,
            Err(e) => {
                self.active.remove(&workflow_id);
                return Err(e);
            }
        };

        tracing::info!(
            workflow_id = %workflow_id,
            name = %workflow.name,
            steps = workflow.steps.len(),
            "workflow started"
        );
        self.event_bus.publish(WorkflowEvent::WorkflowStarted {
            workflow_id,
            name: workflow.name.clone(),
            total_steps: workflow.steps.len(),
        });

        let engine = self.clone();
        Ok(tokio::spawn(async move {
            engine.run(workflow, run).await;
        }))
    }

    /// Abort a live execution. The run fails with `reason` and rolls itself
    /// back, unless every step already succeeded and it is completing.
    pub fn abort(&self, workflow_id: &WorkflowId, reason: &str) -> AbortOutcome {
        let Some(run) = self.active.get(workflow_id).map(|r| r.value().clone()) else {
            return AbortOutcome::NotRunning;
        };
        // First abort reason wins.
        let _ = run.settled.set(Settle::Aborted(reason.to_string()));
        if let Some(Settle::Completing) = run.settled.get() {
            tracing::debug!(workflow_id = %workflow_id, "abort ignored, workflow is completing");
            return AbortOutcome::Completing;
        }
        run.cancel.cancel();
        tracing::info!(workflow_id = %workflow_id, reason, "workflow abort requested");
        AbortOutcome::Aborted
    }

    // -----------------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------------

    async fn prepare(&self, workflow_id: WorkflowId) -> Result<Workflow, EngineError> {
        let mut rejection = None;
        let workflow = self
            .store
            .update_workflow(&workflow_id, |wf| {
                if wf.status != WorkflowStatus::Pending {
                    rejection = Some(format!(
                        "workflow {} is {}, only pending workflows can be started",
                        wf.id, wf.status
                    ));
                    return;
                }
                if wf.steps.is_empty() {
                    rejection = Some(format!("workflow {} has no steps", wf.id));
                    return;
                }
                wf.status = WorkflowStatus::Running;
                wf.started_at = Some(Utc::now());
                wf.log(
                    EventType::WorkflowStarted,
                    None,
                    serde_json::json!({ "total_steps": wf.steps.len() }),
                );
            })
            .await
            .map_err(or_not_found(format!("workflow {workflow_id}")))?;

        match rejection {
            Some(msg) => Err(EngineError::Validation(msg)),
            None => Ok(workflow),
        }
    }

    async fn run(&self, workflow: Workflow, run: ActiveRun) {
        let workflow_id = workflow.id;

        match self.execute_steps(&workflow, &run).await {
            Ok(()) if run.claim_completion() => self.complete(workflow_id).await,
            Ok(()) => {
                let last = workflow.steps.len().saturating_sub(1);
                self.fail(workflow_id, StepFailure::aborted(last, &run)).await;
            }
            Err(failure) if failure.kind == StopKind::Superseded => {
                tracing::warn!(
                    workflow_id = %workflow_id,
                    step_index = failure.step_index,
                    reason = %failure.error,
                    "workflow left active status elsewhere, run stopped"
                );
            }
            Err(failure) => self.fail(workflow_id, failure).await,
        }

        self.active.remove(&workflow_id);
    }

    async fn execute_steps(&self, workflow: &Workflow, run: &ActiveRun) -> Result<(), StepFailure> {
        for (index, step) in workflow.steps.iter().enumerate().skip(workflow.current_step) {
            let mut failures = step.retry_count;

            loop {
                if run.cancel.is_cancelled() {
                    return Err(StepFailure::aborted(index, run));
                }

                let attempt = failures + 1;
                let began = self
                    .begin_step(workflow.id, index, step, attempt)
                    .await
                    .map_err(|e| StepFailure::failed(index, e.to_string()))?;
                if let Some(status) = began {
                    return Err(StepFailure::superseded(index, status));
                }

                let started = Instant::now();
                let result = if step.requires_approval {
                    self.attempt_approval(workflow, step, run).await
                } else {
                    self.attempt_task(workflow, step, run).await
                };

                let error = match result {
                    Attempt::Succeeded(payload) => {
                        self.finish_step(workflow.id, index, step, payload, started.elapsed())
                            .await
                            .map_err(|e| StepFailure::failed(index, e.to_string()))?;
                        break;
                    }
                    Attempt::Aborted(None) => return Err(StepFailure::aborted(index, run)),
                    Attempt::Aborted(Some(reason)) => return Err(StepFailure::interrupted(index, reason)),
                    Attempt::Superseded(status) => return Err(StepFailure::superseded(index, status)),
                    Attempt::Failed(error) => error,
                };

                failures = match self.record_failure(workflow.id, index).await {
                    Ok(Ok(failures)) => failures,
                    Ok(Err(status)) => return Err(StepFailure::superseded(index, status)),
                    Err(e) => return Err(StepFailure::failed(index, e.to_string())),
                };

                if !self.policy.should_retry(failures) {
                    tracing::warn!(
                        workflow_id = %workflow.id,
                        step_index = index,
                        step_id = %step.id,
                        attempts = failures,
                        error = %error,
                        "step exhausted its attempts"
                    );
                    return Err(StepFailure::failed(index, error));
                }

                tracing::info!(
                    workflow_id = %workflow.id,
                    step_index = index,
                    step_id = %step.id,
                    retry_count = failures,
                    error = %error,
                    "retrying step"
                );
                self.append(
                    workflow.id,
                    ExecutionLogEntry::new(
                        EventType::StepRetry,
                        Some(&step.id),
                        serde_json::json!({
                            "step_index": index,
                            "retry_count": failures,
                            "error": error,
                            "delay_ms": self.policy.delay.as_millis() as u64,
                        }),
                    ),
                )
                .await;
                self.event_bus.publish(WorkflowEvent::StepRetrying {
                    workflow_id: workflow.id,
                    step_id: step.id.clone(),
                    retry_count: failures,
                    error,
                });

                tokio::select! {
                    _ = run.cancel.cancelled() => return Err(StepFailure::aborted(index, run)),
                    _ = tokio::time::sleep(self.policy.delay) => {}
                }
            }
        }
        Ok(())
    }

    /// Persist the step position before running an attempt. Returns the
    /// stored status instead when the workflow is no longer active.
    async fn begin_step(
        &self,
        workflow_id: WorkflowId,
        index: usize,
        step: &Step,
        attempt: u32,
    ) -> Result<Option<WorkflowStatus>, EngineError> {
        let action_type = step.action_type.clone();
        let step_id = step.id.clone();
        let mut inactive = None;
        self.store
            .update_workflow(&workflow_id, |wf| {
                if !wf.status.is_active() {
                    inactive = Some(wf.status);
                    return;
                }
                if !wf.advance_to(index) {
                    tracing::warn!(workflow_id = %wf.id, current = wf.current_step, index, "refusing to move current_step backwards");
                }
                wf.log(
                    EventType::StepStarted,
                    Some(&step_id),
                    serde_json::json!({
                        "step_index": index,
                        "attempt": attempt,
                        "action_type": action_type,
                    }),
                );
            })
            .await?;
        if inactive.is_some() {
            return Ok(inactive);
        }

        tracing::debug!(workflow_id = %workflow_id, step_index = index, step_id = %step.id, attempt, "step started");
        self.event_bus.publish(WorkflowEvent::StepStarted {
            workflow_id,
            step_index: index,
            step_id: step.id.clone(),
            attempt,
        });
        Ok(None)
    }

    async fn finish_step(
        &self,
        workflow_id: WorkflowId,
        index: usize,
        step: &Step,
        result: serde_json::Value,
        elapsed: Duration,
    ) -> Result<(), EngineError> {
        let duration_ms = elapsed.as_millis() as u64;
        let entry = ExecutionLogEntry::new(
            EventType::StepCompleted,
            Some(&step.id),
            serde_json::json!({
                "step_index": index,
                "result": result,
                "duration_ms": duration_ms,
            }),
        );
        self.store.append_log(&workflow_id, &entry).await?;

        tracing::info!(workflow_id = %workflow_id, step_index = index, step_id = %step.id, duration_ms, "step completed");
        self.event_bus.publish(WorkflowEvent::StepCompleted {
            workflow_id,
            step_index: index,
            step_id: step.id.clone(),
            duration_ms,
        });
        Ok(())
    }

    /// Persist one more failed attempt and return the new count, or the
    /// stored status when the workflow is no longer active.
    async fn record_failure(
        &self,
        workflow_id: WorkflowId,
        index: usize,
    ) -> Result<Result<u32, WorkflowStatus>, EngineError> {
        let workflow = self
            .store
            .update_workflow(&workflow_id, |wf| {
                if !wf.status.is_active() {
                    return;
                }
                if let Some(step) = wf.steps.get_mut(index) {
                    step.retry_count += 1;
                }
            })
            .await?;
        if !workflow.status.is_active() {
            return Ok(Err(workflow.status));
        }
        Ok(Ok(workflow.steps.get(index).map_or(0, |s| s.retry_count)))
    }

    async fn attempt_task(&self, workflow: &Workflow, step: &Step, run: &ActiveRun) -> Attempt {
        let ctx = TaskContext::for_step(workflow.id, step, &workflow.metadata);
        let limit = Duration::from_secs(step.timeout_secs);

        tokio::select! {
            _ = run.cancel.cancelled() => Attempt::Aborted(None),
            result = tokio::time::timeout(limit, self.executor.execute(&ctx)) => {
                match result {
                    Ok(Ok(outcome)) if outcome.success => Attempt::Succeeded(outcome.result),
                    Ok(Ok(outcome)) => {
                        self.append(
                            workflow.id,
                            ExecutionLogEntry::new(EventType::TaskFailed, Some(&step.id), outcome.result),
                        )
                        .await;
                        Attempt::Failed(format!("step '{}' reported failure", step.id))
                    }
                    Ok(Err(e)) => self.execution_error(workflow.id, step, e).await,
                    Err(_) => self.execution_error(workflow.id, step, ExecutionError::TimedOut(limit)).await,
                }
            }
        }
    }

    async fn execution_error(&self, workflow_id: WorkflowId, step: &Step, error: ExecutionError) -> Attempt {
        tracing::warn!(workflow_id = %workflow_id, step_id = %step.id, error = %error, "step execution error");
        self.append(
            workflow_id,
            ExecutionLogEntry::new(
                EventType::StepExecutionError,
                Some(&step.id),
                serde_json::json!({ "error": error.to_string() }),
            ),
        )
        .await;
        Attempt::Failed(error.to_string())
    }

    async fn attempt_approval(&self, workflow: &Workflow, step: &Step, run: &ActiveRun) -> Attempt {
        let workflow_id = workflow.id;
        let timeout = Duration::from_secs(step.timeout_secs);

        if let Some(status) = self.set_status(workflow_id, WorkflowStatus::AwaitingApproval).await {
            return Attempt::Superseded(status);
        }

        let mut metadata: HashMap<String, serde_json::Value> = step.metadata.clone();
        metadata.insert("workflow_name".to_string(), workflow.name.clone().into());
        metadata.insert("step_name".to_string(), step.name.clone().into());

        let request = match self
            .gate
            .create_request(workflow_id, &step.id, step.approval_level, metadata, timeout)
            .await
        {
            Ok(request) => request,
            Err(e) => {
                self.set_status(workflow_id, WorkflowStatus::Running).await;
                return Attempt::Failed(e.to_string());
            }
        };

        self.append(
            workflow_id,
            ExecutionLogEntry::new(
                EventType::ApprovalRequested,
                Some(&step.id),
                serde_json::json!({
                    "request_id": request.id,
                    "approval_level": request.approval_level,
                    "timeout_at": request.timeout_at,
                }),
            ),
        )
        .await;

        let outcome = self.gate.await_decision(request.id, timeout, &run.cancel).await;
        let left = self.set_status(workflow_id, WorkflowStatus::Running).await;

        let attempt = match outcome {
            Ok(ApprovalOutcome::Approved) => {
                let approver = self.decided_by(request.id).await;
                self.log_resolution(workflow_id, step, request.id, ApprovalOutcome::Approved, approver.as_deref())
                    .await;
                Attempt::Succeeded(serde_json::json!({
                    "request_id": request.id,
                    "approved_by": approver,
                }))
            }
            Ok(ApprovalOutcome::Rejected) => {
                let approver = self.decided_by(request.id).await;
                self.log_resolution(workflow_id, step, request.id, ApprovalOutcome::Rejected, approver.as_deref())
                    .await;
                Attempt::Failed(format!(
                    "approval for step '{}' rejected by {}",
                    step.id,
                    approver.as_deref().unwrap_or("unknown")
                ))
            }
            Ok(ApprovalOutcome::TimedOut) => {
                self.append(
                    workflow_id,
                    ExecutionLogEntry::new(
                        EventType::ApprovalTimeout,
                        Some(&step.id),
                        serde_json::json!({
                            "request_id": request.id,
                            "timeout_secs": step.timeout_secs,
                        }),
                    ),
                )
                .await;
                Attempt::Failed(format!("approval for step '{}' timed out", step.id))
            }
            Ok(ApprovalOutcome::Cancelled) => {
                self.log_resolution(workflow_id, step, request.id, ApprovalOutcome::Cancelled, None)
                    .await;
                // A request cancelled outside this run is never retried.
                if run.cancel.is_cancelled() {
                    Attempt::Aborted(None)
                } else {
                    Attempt::Aborted(Some(format!("approval for step '{}' was cancelled", step.id)))
                }
            }
            Err(e) => Attempt::Failed(e.to_string()),
        };

        match left {
            Some(status) => Attempt::Superseded(status),
            None => attempt,
        }
    }

    async fn decided_by(&self, request_id: Uuid) -> Option<String> {
        match self.store.list_approval_responses(&request_id).await {
            Ok(responses) => responses
                .into_iter()
                .find(|r| !r.late)
                .map(|r| r.approver),
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "failed to load approval responses");
                None
            }
        }
    }

    async fn log_resolution(
        &self,
        workflow_id: WorkflowId,
        step: &Step,
        request_id: Uuid,
        outcome: ApprovalOutcome,
        approver: Option<&str>,
    ) {
        self.append(
            workflow_id,
            ExecutionLogEntry::new(
                EventType::ApprovalResolved,
                Some(&step.id),
                serde_json::json!({
                    "request_id": request_id,
                    "outcome": outcome,
                    "approver": approver,
                }),
            ),
        )
        .await;
    }

    // -----------------------------------------------------------------------
    // Terminal paths
    // -----------------------------------------------------------------------

    async fn complete(&self, workflow_id: WorkflowId) {
        let mut completed = false;
        let result = self
            .store
            .update_workflow(&workflow_id, |wf| {
                if wf.transition(WorkflowStatus::Completed).is_ok() {
                    wf.completed_at = Some(Utc::now());
                    wf.log(
                        EventType::WorkflowCompleted,
                        None,
                        serde_json::json!({ "total_steps": wf.steps.len() }),
                    );
                    completed = true;
                }
            })
            .await;

        match result {
            Ok(workflow) if completed => {
                tracing::info!(workflow_id = %workflow_id, "workflow completed");
                self.notifier.workflow_completed(&workflow).await;
                self.event_bus
                    .publish(WorkflowEvent::WorkflowCompleted { workflow_id });
            }
            Ok(workflow) => {
                tracing::warn!(workflow_id = %workflow_id, status = %workflow.status, "workflow finished its steps but could not complete");
            }
            Err(e) => {
                tracing::error!(workflow_id = %workflow_id, error = %e, "failed to persist workflow completion");
            }
        }
    }

    async fn fail(&self, workflow_id: WorkflowId, failure: StepFailure) {
        let mut failed = false;
        let result = self
            .store
            .update_workflow(&workflow_id, |wf| match wf.transition(WorkflowStatus::Failed) {
                Ok(()) => {
                    wf.log(
                        EventType::WorkflowFailed,
                        None,
                        serde_json::json!({
                            "failed_step": failure.step_index,
                            "error": failure.error,
                            "aborted": failure.kind == StopKind::Aborted,
                        }),
                    );
                    failed = true;
                }
                Err(e) => {
                    tracing::warn!(workflow_id = %wf.id, error = %e, "workflow could not be marked failed");
                }
            })
            .await;

        if let Err(e) = result {
            tracing::error!(workflow_id = %workflow_id, error = %e, "failed to persist workflow failure");
            return;
        }
        if !failed {
            return;
        }

        tracing::error!(
            workflow_id = %workflow_id,
            failed_step = failure.step_index,
            aborted = failure.kind == StopKind::Aborted,
            error = %failure.error,
            "workflow failed"
        );
        self.event_bus.publish(WorkflowEvent::WorkflowFailed {
            workflow_id,
            failed_step: failure.step_index,
            error: failure.error.clone(),
        });

        if let Err(e) = self.rollback.execute_rollback(workflow_id, &failure.error).await {
            tracing::error!(workflow_id = %workflow_id, error = %e, "rollback failed");
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Move between the two active statuses. Returns the stored status when
    /// the workflow has left them.
    async fn set_status(&self, workflow_id: WorkflowId, next: WorkflowStatus) -> Option<WorkflowStatus> {
        let result = self
            .store
            .update_workflow(&workflow_id, |wf| {
                if let Err(e) = wf.transition(next) {
                    tracing::debug!(workflow_id = %wf.id, error = %e, "status unchanged");
                }
            })
            .await;
        match result {
            Ok(wf) if !wf.status.is_active() => Some(wf.status),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(workflow_id = %workflow_id, status = %next, error = %e, "failed to persist status");
                None
            }
        }
    }

    async fn append(&self, workflow_id: WorkflowId, entry: ExecutionLogEntry) {
        if let Err(e) = self.store.append_log(&workflow_id, &entry).await {
            tracing::warn!(workflow_id = %workflow_id, event = %entry.event_type, error = %e, "failed to append log entry");
        }
    }
}
