//! Approval gate: creates approval requests, suspends callers until a
//! decision or deadline, and resolves each request exactly once.
//!
//! The store's pending-only compare-and-set is the arbiter of every race
//! (decision vs. timeout vs. cancel). The in-process `DecisionSlot` only
//! carries the winner to a local waiter.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use stepgate_types::approval::{
    ApprovalDecision, ApprovalOutcome, ApprovalRequest, ApprovalResponse, ApprovalStatus,
};
use stepgate_types::error::RepositoryError;
use stepgate_types::event::WorkflowEvent;
use stepgate_types::workflow::{EventType, ExecutionLogEntry, WorkflowId};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::notify::{BestEffortNotifier, Notifier};
use crate::repository::Store;

use super::error::EngineError;

// ---------------------------------------------------------------------------
// DecisionSlot
// ---------------------------------------------------------------------------

/// One-shot, first-wins rendezvous between resolvers and a single waiter.
///
/// Any number of sources may call `resolve`; only the first value is kept.
#[derive(Debug, Default)]
struct DecisionSlot {
    outcome: OnceLock<ApprovalOutcome>,
    notify: Notify,
}

impl DecisionSlot {
    fn resolve(&self, outcome: ApprovalOutcome) -> bool {
        let won = self.outcome.set(outcome).is_ok();
        // notify_one stores a permit when nobody is waiting yet.
        self.notify.notify_one();
        won
    }

    fn get(&self) -> Option<ApprovalOutcome> {
        self.outcome.get().copied()
    }

    async fn wait(&self) -> ApprovalOutcome {
        loop {
            if let Some(outcome) = self.get() {
                return outcome;
            }
            self.notify.notified().await;
        }
    }
}

/// Result of one [`ApprovalGate::timeout_sweep`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Pending requests moved to `timeout` by this pass.
    pub expired: usize,
    /// Local waiters woken because the store already held a decision.
    pub reconciled: usize,
}

// ---------------------------------------------------------------------------
// ApprovalGate
// ---------------------------------------------------------------------------

/// Human-in-the-loop gate for workflow steps.
pub struct ApprovalGate<S: Store, N: Notifier> {
    store: Arc<S>,
    notifier: BestEffortNotifier<N>,
    event_bus: EventBus,
    waiters: DashMap<Uuid, Arc<DecisionSlot>>,
}

impl<S: Store, N: Notifier + 'static> ApprovalGate<S, N> {
    pub fn new(store: Arc<S>, notifier: BestEffortNotifier<N>, event_bus: EventBus) -> Self {
        Self {
            store,
            notifier,
            event_bus,
            waiters: DashMap::new(),
        }
    }

    /// Persist a pending request and register a local decision slot for it.
    pub async fn create_request(
        &self,
        workflow_id: WorkflowId,
        step_id: &str,
        approval_level: u8,
        metadata: HashMap<String, serde_json::Value>,
        timeout: Duration,
    ) -> Result<ApprovalRequest, EngineError> {
        if timeout.is_zero() {
            return Err(EngineError::Validation(format!(
                "approval timeout for step '{step_id}' must be greater than zero"
            )));
        }

        let request = ApprovalRequest::new(workflow_id, step_id, approval_level, metadata, timeout);
        self.store
            .save_approval_request(&request)
            .await
            .map_err(conflict_to_concurrency)?;
        self.waiters
            .insert(request.id, Arc::new(DecisionSlot::default()));

        tracing::info!(
            workflow_id = %workflow_id,
            request_id = %request.id,
            step_id,
            approval_level,
            timeout_at = %request.timeout_at,
            "approval requested"
        );

        self.notifier.approval_requested(&request).await;
        self.event_bus.publish(WorkflowEvent::ApprovalRequested {
            request: request.clone(),
        });

        Ok(request)
    }

    /// Suspend until the request is decided, `timeout` elapses, or `cancel`
    /// fires.
    ///
    /// On timeout or cancellation the gate itself attempts the
    /// pending -> timeout/cancelled transition; if a decision won that race,
    /// the stored decision is returned instead.
    pub async fn await_decision(
        &self,
        request_id: Uuid,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ApprovalOutcome, EngineError> {
        let existing = self
            .waiters
            .get(&request_id)
            .map(|slot| Arc::clone(slot.value()));
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let request = self.load(&request_id).await?;
                if let Some(outcome) = request.status.outcome() {
                    return Ok(outcome);
                }
                let slot = Arc::new(DecisionSlot::default());
                self.waiters.insert(request_id, Arc::clone(&slot));
                slot
            }
        };

        let result = tokio::select! {
            outcome = slot.wait() => Ok(outcome),
            _ = tokio::time::sleep(timeout) => {
                self.expire(request_id, ApprovalStatus::Timeout).await
            }
            _ = cancel.cancelled() => {
                self.expire(request_id, ApprovalStatus::Cancelled).await
            }
        };

        self.waiters.remove(&request_id);
        result
    }

    /// Record a human decision.
    ///
    /// Fails with `NotFound` for an unknown request and with `Concurrency`
    /// when the request is no longer pending. A decision arriving after the
    /// request expired is still stored (flagged `late`) for audit.
    pub async fn submit_decision(
        &self,
        request_id: Uuid,
        decision: ApprovalDecision,
    ) -> Result<ApprovalResponse, EngineError> {
        let request = self.load(&request_id).await?;
        if request.status.is_terminal() {
            return Err(self.reject_resolved(&request, &decision).await);
        }

        let resolved = match self
            .store
            .update_approval_status(&request_id, decision.action.status())
            .await
        {
            Ok(resolved) => resolved,
            Err(RepositoryError::Conflict(_)) => {
                // Lost the race to a sweep, a cancel or another decision.
                let current = self.load(&request_id).await?;
                return Err(self.reject_resolved(&current, &decision).await);
            }
            Err(e) => return Err(e.into()),
        };

        // The status is committed: from here on the decision stands and the
        // waiter is always woken, even if the audit row cannot be written.
        let response = ApprovalResponse::new(request_id, &decision);
        if let Err(e) = self.store.save_approval_response(&response).await {
            tracing::warn!(request_id = %request_id, error = %e, "failed to record approval response");
        }

        let outcome = resolved
            .status
            .outcome()
            .unwrap_or(ApprovalOutcome::Rejected);
        let delivered = self.signal(request_id, outcome);

        tracing::info!(
            workflow_id = %resolved.workflow_id,
            request_id = %request_id,
            action = %decision.action,
            approver = %decision.approver,
            waiter = delivered,
            "approval decision recorded"
        );

        self.notifier.approval_resolved(&resolved, &response).await;
        self.event_bus.publish(WorkflowEvent::ApprovalResolved {
            workflow_id: resolved.workflow_id,
            request_id,
            outcome,
        });

        Ok(response)
    }

    /// Cancel a pending request, waking its waiter with `Cancelled`.
    pub async fn cancel_request(&self, request_id: Uuid) -> Result<ApprovalOutcome, EngineError> {
        self.expire(request_id, ApprovalStatus::Cancelled).await
    }

    /// All pending requests, newest first.
    pub async fn pending_approvals(&self) -> Result<Vec<ApprovalRequest>, EngineError> {
        Ok(self.store.list_pending_approvals().await?)
    }

    /// Whether a local waiter is registered for `request_id`.
    pub fn has_waiter(&self, request_id: &Uuid) -> bool {
        self.waiters.contains_key(request_id)
    }

    /// Expire overdue pending requests and wake local waiters whose request
    /// was already resolved in the store by another writer.
    pub async fn timeout_sweep(&self) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport::default();
        let now = Utc::now();

        for request in self.store.list_pending_approvals().await? {
            if !request.is_expired(now) {
                continue;
            }
            let orphaned = !self.waiters.contains_key(&request.id);
            match self.expire(request.id, ApprovalStatus::Timeout).await {
                Ok(ApprovalOutcome::TimedOut) => {
                    report.expired += 1;
                    if orphaned {
                        // Nobody in this process will log it for the workflow.
                        let entry = ExecutionLogEntry::new(
                            EventType::ApprovalTimeout,
                            Some(&request.step_id),
                            serde_json::json!({ "request_id": request.id, "orphaned": true }),
                        );
                        if let Err(e) = self.store.append_log(&request.workflow_id, &entry).await {
                            tracing::warn!(request_id = %request.id, error = %e, "failed to log orphaned approval timeout");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(request_id = %request.id, error = %e, "approval sweep failed to expire request");
                }
            }
        }

        // Snapshot first: no DashMap guard may be held across an await.
        let open: Vec<(Uuid, Arc<DecisionSlot>)> = self
            .waiters
            .iter()
            .filter(|entry| entry.value().get().is_none())
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        for (request_id, slot) in open {
            match self.store.get_approval_request(&request_id).await {
                Ok(Some(request)) => {
                    if let Some(outcome) = request.status.outcome() {
                        if slot.resolve(outcome) {
                            report.reconciled += 1;
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(request_id = %request_id, error = %e, "approval sweep failed to read request");
                }
            }
        }

        if report.expired > 0 || report.reconciled > 0 {
            tracing::info!(
                expired = report.expired,
                reconciled = report.reconciled,
                "approval sweep"
            );
        }
        Ok(report)
    }

    /// Run [`timeout_sweep`](Self::timeout_sweep) every `interval` until
    /// `shutdown` fires.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.timeout_sweep().await {
                            tracing::warn!(error = %e, "approval sweep failed");
                        }
                    }
                }
            }
            tracing::debug!("approval sweeper stopped");
        })
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn load(&self, request_id: &Uuid) -> Result<ApprovalRequest, EngineError> {
        self.store
            .get_approval_request(request_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("approval request {request_id}")))
    }

    /// Hand `outcome` to the local waiter, if any. Returns whether one existed.
    fn signal(&self, request_id: Uuid, outcome: ApprovalOutcome) -> bool {
        match self.waiters.get(&request_id) {
            Some(slot) => {
                slot.resolve(outcome);
                true
            }
            None => false,
        }
    }

    /// Attempt pending -> `status` (timeout or cancelled). If the request was
    /// already resolved, the stored outcome wins and is returned.
    async fn expire(&self, request_id: Uuid, status: ApprovalStatus) -> Result<ApprovalOutcome, EngineError> {
        match self.store.update_approval_status(&request_id, status).await {
            Ok(request) => {
                let outcome = request.status.outcome().unwrap_or(ApprovalOutcome::TimedOut);
                self.signal(request_id, outcome);
                tracing::info!(
                    workflow_id = %request.workflow_id,
                    request_id = %request_id,
                    status = %request.status,
                    "approval request expired"
                );
                self.event_bus.publish(WorkflowEvent::ApprovalResolved {
                    workflow_id: request.workflow_id,
                    request_id,
                    outcome,
                });
                Ok(outcome)
            }
            Err(RepositoryError::Conflict(_)) => {
                let request = self.load(&request_id).await?;
                let outcome = request.status.outcome().ok_or_else(|| {
                    EngineError::Concurrency(format!("approval request {request_id} is still pending"))
                })?;
                self.signal(request_id, outcome);
                Ok(outcome)
            }
            Err(RepositoryError::NotFound) => {
                Err(EngineError::NotFound(format!("approval request {request_id}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Build the error for a decision on a non-pending request. Decisions on
    /// expired requests are kept as late responses.
    async fn reject_resolved(&self, request: &ApprovalRequest, decision: &ApprovalDecision) -> EngineError {
        if request.status.is_expired() {
            let mut response = ApprovalResponse::new(request.id, decision);
            response.late = true;
            if let Err(e) = self.store.save_approval_response(&response).await {
                tracing::warn!(request_id = %request.id, error = %e, "failed to record late decision");
            }
            let entry = ExecutionLogEntry::new(
                EventType::LateApprovalDecision,
                Some(&request.step_id),
                serde_json::json!({
                    "request_id": request.id,
                    "request_status": request.status,
                    "action": decision.action,
                    "approver": decision.approver,
                }),
            );
            if let Err(e) = self.store.append_log(&request.workflow_id, &entry).await {
                tracing::warn!(request_id = %request.id, error = %e, "failed to log late decision");
            }
            tracing::warn!(
                workflow_id = %request.workflow_id,
                request_id = %request.id,
                status = %request.status,
                approver = %decision.approver,
                "late approval decision recorded for audit"
            );
        }
        EngineError::Concurrency(format!(
            "approval request {} already {}",
            request.id, request.status
        ))
    }
}

fn conflict_to_concurrency(e: RepositoryError) -> EngineError {
    match e {
        RepositoryError::Conflict(msg) => EngineError::Concurrency(msg),
        other => EngineError::Repository(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepgate_types::config::EngineConfig;
    use crate::notify::NoopNotifier;
    use crate::repository::memory::InMemoryStore;
    use crate::repository::{ApprovalRepository, WorkflowRepository};
    use stepgate_types::workflow::{NewStep, NewWorkflow, Workflow};

    fn gate(store: &InMemoryStore) -> Arc<ApprovalGate<InMemoryStore, NoopNotifier>> {
        Arc::new(ApprovalGate::new(
            Arc::new(store.clone()),
            BestEffortNotifier::new(Arc::new(NoopNotifier), Duration::from_secs(1)),
            EventBus::new(64),
        ))
    }

    async fn saved_workflow(store: &InMemoryStore) -> WorkflowId {
        let wf = Workflow::from_draft(NewWorkflow {
            name: "w".to_string(),
            description: None,
            priority: 0,
            metadata: HashMap::new(),
            steps: vec![NewStep::approval("review", 1, 60)],
        }, &EngineConfig::default());
        store.save_workflow(&wf).await.unwrap();
        wf.id
    }

    async fn request(gate: &ApprovalGate<InMemoryStore, NoopNotifier>, wf: WorkflowId, timeout: Duration) -> ApprovalRequest {
        gate.create_request(wf, "review", 1, HashMap::new(), timeout)
            .await
            .unwrap()
    }

    #[test]
    fn slot_keeps_first_value() {
        let slot = DecisionSlot::default();
        assert!(slot.resolve(ApprovalOutcome::Approved));
        assert!(!slot.resolve(ApprovalOutcome::TimedOut));
        assert_eq!(slot.get(), Some(ApprovalOutcome::Approved));
    }

    #[tokio::test]
    async fn zero_timeout_is_rejected() {
        let store = InMemoryStore::new();
        let gate = gate(&store);
        let err = gate
            .create_request(WorkflowId::new(), "review", 1, HashMap::new(), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn second_pending_request_for_same_step_conflicts() {
        let store = InMemoryStore::new();
        let gate = gate(&store);
        let wf = saved_workflow(&store).await;
        request(&gate, wf, Duration::from_secs(60)).await;

        let err = gate
            .create_request(wf, "review", 1, HashMap::new(), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Concurrency(_)));
    }

    #[tokio::test]
    async fn decision_wakes_waiter() {
        let store = InMemoryStore::new();
        let gate = gate(&store);
        let wf = saved_workflow(&store).await;
        let req = request(&gate, wf, Duration::from_secs(60)).await;

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                gate.await_decision(req.id, Duration::from_secs(60), &CancellationToken::new())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.submit_decision(req.id, ApprovalDecision::approve("alice"))
            .await
            .unwrap();

        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome, ApprovalOutcome::Approved);
        assert!(!gate.has_waiter(&req.id));
    }

    #[tokio::test]
    async fn committed_decision_wakes_waiter_when_response_write_fails() {
        let store = InMemoryStore::new();
        let gate = gate(&store);
        let wf = saved_workflow(&store).await;
        let req = request(&gate, wf, Duration::from_secs(60)).await;

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                gate.await_decision(req.id, Duration::from_secs(60), &CancellationToken::new())
                    .await
            })
        };

        store.fail_response_writes();
        let response = gate
            .submit_decision(req.id, ApprovalDecision::approve("alice"))
            .await
            .unwrap();
        assert_eq!(response.approver, "alice");

        let outcome = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ApprovalOutcome::Approved);

        let stored = store.get_approval_request(&req.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ApprovalStatus::Approved);
        assert!(store.list_approval_responses(&req.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn decision_before_wait_is_not_lost() {
        let store = InMemoryStore::new();
        let gate = gate(&store);
        let wf = saved_workflow(&store).await;
        let req = request(&gate, wf, Duration::from_secs(60)).await;

        gate.submit_decision(req.id, ApprovalDecision::reject("bob", Some("too risky")))
            .await
            .unwrap();

        let outcome = gate
            .await_decision(req.id, Duration::from_secs(60), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, ApprovalOutcome::Rejected);
    }

    #[tokio::test]
    async fn second_decision_is_a_conflict_without_state_change() {
        let store = InMemoryStore::new();
        let gate = gate(&store);
        let wf = saved_workflow(&store).await;
        let req = request(&gate, wf, Duration::from_secs(60)).await;

        gate.submit_decision(req.id, ApprovalDecision::approve("alice"))
            .await
            .unwrap();
        let err = gate
            .submit_decision(req.id, ApprovalDecision::reject("bob", None))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Concurrency(_)));

        let stored = store.get_approval_request(&req.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ApprovalStatus::Approved);
        assert_eq!(store.list_approval_responses(&req.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let store = InMemoryStore::new();
        let gate = gate(&store);
        let err = gate
            .submit_decision(Uuid::now_v7(), ApprovalDecision::approve("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn wait_times_out_and_marks_request() {
        let store = InMemoryStore::new();
        let gate = gate(&store);
        let wf = saved_workflow(&store).await;
        let req = request(&gate, wf, Duration::from_millis(50)).await;

        let outcome = gate
            .await_decision(req.id, Duration::from_millis(50), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, ApprovalOutcome::TimedOut);

        let stored = store.get_approval_request(&req.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ApprovalStatus::Timeout);
        assert!(stored.resolved_at.is_some());
    }

    #[tokio::test]
    async fn cancellation_marks_request_cancelled() {
        let store = InMemoryStore::new();
        let gate = gate(&store);
        let wf = saved_workflow(&store).await;
        let req = request(&gate, wf, Duration::from_secs(60)).await;

        let cancel = CancellationToken::new();
        let waiter = {
            let gate = Arc::clone(&gate);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                gate.await_decision(req.id, Duration::from_secs(60), &cancel)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        assert_eq!(waiter.await.unwrap().unwrap(), ApprovalOutcome::Cancelled);
        let stored = store.get_approval_request(&req.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ApprovalStatus::Cancelled);
    }

    #[tokio::test]
    async fn late_decision_after_sweep_is_recorded_for_audit() {
        let store = InMemoryStore::new();
        let gate = gate(&store);
        let wf = saved_workflow(&store).await;
        let req = request(&gate, wf, Duration::from_millis(10)).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        let report = gate.timeout_sweep().await.unwrap();
        assert_eq!(report.expired, 1);

        let err = gate
            .submit_decision(req.id, ApprovalDecision::approve("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Concurrency(_)));

        let stored = store.get_approval_request(&req.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ApprovalStatus::Timeout);

        let responses = store.list_approval_responses(&req.id).await.unwrap();
        assert_eq!(responses.len(), 1);
        assert!(responses[0].late);

        let wf = store.get_workflow(&wf).await.unwrap().unwrap();
        assert_eq!(wf.count_events(EventType::LateApprovalDecision), 1);
    }

    #[tokio::test]
    async fn sweep_wakes_waiter_with_timeout() {
        let store = InMemoryStore::new();
        let gate = gate(&store);
        let wf = saved_workflow(&store).await;
        let req = request(&gate, wf, Duration::from_millis(10)).await;

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                // Longer than the request deadline: the sweep must win.
                gate.await_decision(req.id, Duration::from_secs(30), &CancellationToken::new())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        gate.timeout_sweep().await.unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), ApprovalOutcome::TimedOut);
    }

    #[tokio::test]
    async fn sweep_reconciles_decision_made_elsewhere() {
        let store = InMemoryStore::new();
        let gate = gate(&store);
        let wf = saved_workflow(&store).await;
        let req = request(&gate, wf, Duration::from_secs(60)).await;

        // Simulates a second process writing directly to the shared store.
        store
            .update_approval_status(&req.id, ApprovalStatus::Approved)
            .await
            .unwrap();

        let report = gate.timeout_sweep().await.unwrap();
        assert_eq!(report.reconciled, 1);
        let outcome = gate
            .await_decision(req.id, Duration::from_secs(60), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, ApprovalOutcome::Approved);
    }

    #[tokio::test]
    async fn timeout_and_decision_race_resolves_once() {
        for _ in 0..20 {
            let store = InMemoryStore::new();
            let gate = gate(&store);
            let wf = saved_workflow(&store).await;
            let req = request(&gate, wf, Duration::from_millis(5)).await;

            let waiter = {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move {
                    gate.await_decision(req.id, Duration::from_millis(5), &CancellationToken::new())
                        .await
                })
            };
            tokio::time::sleep(Duration::from_millis(5)).await;
            let decision = gate
                .submit_decision(req.id, ApprovalDecision::approve("alice"))
                .await;

            let outcome = waiter.await.unwrap().unwrap();
            let stored = store.get_approval_request(&req.id).await.unwrap().unwrap();
            assert_eq!(stored.status.outcome(), Some(outcome));
            match outcome {
                ApprovalOutcome::Approved => assert!(decision.is_ok()),
                ApprovalOutcome::TimedOut => assert!(decision.is_err()),
                other => panic!("unexpected outcome {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn sweeper_stops_on_shutdown() {
        let store = InMemoryStore::new();
        let gate = gate(&store);
        let shutdown = CancellationToken::new();
        let handle = Arc::clone(&gate).spawn_sweeper(Duration::from_millis(10), shutdown.clone());
        tokio::time::sleep(Duration::from_millis(25)).await;
        shutdown.cancel();
        handle.await.unwrap();
    }
}
