//! In-memory store backed by `DashMap`.
//!
//! Implements both repository traits without any I/O. Used by tests and by
//! ephemeral runs where durability is not required. Cloning shares the
//! underlying maps.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use stepgate_types::approval::{ApprovalRequest, ApprovalResponse, ApprovalStatus};
use stepgate_types::error::RepositoryError;
use stepgate_types::workflow::{ExecutionLogEntry, Workflow, WorkflowId, WorkflowStatus};
use uuid::Uuid;

use super::{ApprovalRepository, WorkflowRepository};

#[derive(Debug, Default)]
struct Inner {
    workflows: DashMap<WorkflowId, Workflow>,
    requests: DashMap<Uuid, ApprovalRequest>,
    responses: DashMap<Uuid, Vec<ApprovalResponse>>,
    /// (workflow, step) -> id of the most recent request for that step.
    live: DashMap<(WorkflowId, String), Uuid>,
    #[cfg(test)]
    fail_responses: std::sync::atomic::AtomicBool,
}

/// Thread-safe in-memory implementation of the store traits.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `save_approval_response` fail.
    #[cfg(test)]
    pub(crate) fn fail_response_writes(&self) {
        self.inner
            .fail_responses
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

impl WorkflowRepository for InMemoryStore {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        self.inner.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: &WorkflowId) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self.inner.workflows.get(id).map(|w| w.clone()))
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, RepositoryError> {
        let mut all: Vec<Workflow> = self.inner.workflows.iter().map(|w| w.clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(all)
    }

    async fn update_workflow_status(
        &self,
        id: &WorkflowId,
        status: WorkflowStatus,
        current_step: Option<usize>,
    ) -> Result<(), RepositoryError> {
        let mut wf = self
            .inner
            .workflows
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;
        wf.status = status;
        if let Some(step) = current_step {
            wf.current_step = step;
        }
        Ok(())
    }

    async fn update_workflow<F>(&self, id: &WorkflowId, mutate: F) -> Result<Workflow, RepositoryError>
    where
        F: FnOnce(&mut Workflow) + Send,
    {
        // The shard write lock is held for the whole mutation.
        let mut wf = self
            .inner
            .workflows
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;
        mutate(&mut wf);
        Ok(wf.clone())
    }

    async fn append_log(
        &self,
        id: &WorkflowId,
        entry: &ExecutionLogEntry,
    ) -> Result<(), RepositoryError> {
        let mut wf = self
            .inner
            .workflows
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;
        wf.execution_log.push(entry.clone());
        Ok(())
    }
}

impl ApprovalRepository for InMemoryStore {
    async fn save_approval_request(&self, request: &ApprovalRequest) -> Result<(), RepositoryError> {
        let key = (request.workflow_id, request.step_id.clone());
        match self.inner.live.entry(key) {
            Entry::Occupied(mut slot) => {
                let still_pending = self
                    .inner
                    .requests
                    .get(slot.get())
                    .is_some_and(|r| r.status == ApprovalStatus::Pending);
                if still_pending {
                    return Err(RepositoryError::Conflict(format!(
                        "pending approval already exists for step '{}'",
                        request.step_id
                    )));
                }
                slot.insert(request.id);
            }
            Entry::Vacant(slot) => {
                slot.insert(request.id);
            }
        }
        self.inner.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_approval_request(&self, id: &Uuid) -> Result<Option<ApprovalRequest>, RepositoryError> {
        Ok(self.inner.requests.get(id).map(|r| r.clone()))
    }

    async fn update_approval_status(
        &self,
        id: &Uuid,
        status: ApprovalStatus,
    ) -> Result<ApprovalRequest, RepositoryError> {
        let mut req = self
            .inner
            .requests
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;
        if req.status != ApprovalStatus::Pending {
            return Err(RepositoryError::Conflict(format!(
                "approval request already {}",
                req.status
            )));
        }
        req.status = status;
        req.resolved_at = Some(Utc::now());
        Ok(req.clone())
    }

    async fn save_approval_response(&self, response: &ApprovalResponse) -> Result<(), RepositoryError> {
        #[cfg(test)]
        if self.inner.fail_responses.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(RepositoryError::Query("response writes disabled".to_string()));
        }
        if !self.inner.requests.contains_key(&response.request_id) {
            return Err(RepositoryError::NotFound);
        }
        self.inner
            .responses
            .entry(response.request_id)
            .or_default()
            .push(response.clone());
        Ok(())
    }

    async fn list_approval_responses(
        &self,
        request_id: &Uuid,
    ) -> Result<Vec<ApprovalResponse>, RepositoryError> {
        Ok(self
            .inner
            .responses
            .get(request_id)
            .map(|r| r.clone())
            .unwrap_or_default())
    }

    async fn list_pending_approvals(&self) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let mut pending: Vec<ApprovalRequest> = self
            .inner
            .requests
            .iter()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .map(|r| r.clone())
            .collect();
        pending.sort_by(|a, b| b.requested_at.cmp(&a.requested_at).then(b.id.cmp(&a.id)));
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepgate_types::config::EngineConfig;
    use std::collections::HashMap;
    use std::time::Duration;
    use stepgate_types::approval::{ApprovalAction, ApprovalDecision};
    use stepgate_types::workflow::{EventType, NewStep, NewWorkflow};

    fn sample_workflow() -> Workflow {
        Workflow::from_draft(NewWorkflow {
            name: "sample".to_string(),
            description: None,
            priority: 0,
            metadata: HashMap::new(),
            steps: vec![
                NewStep::automated("validate", "validate_data"),
                NewStep::approval("review", 1, 60),
            ],
        }, &EngineConfig::default())
    }

    fn sample_request(workflow_id: WorkflowId) -> ApprovalRequest {
        ApprovalRequest::new(workflow_id, "review", 1, HashMap::new(), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn save_and_get_workflow() {
        let store = InMemoryStore::new();
        let wf = sample_workflow();
        store.save_workflow(&wf).await.unwrap();

        let loaded = store.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "sample");
        assert_eq!(loaded.steps.len(), 2);
        assert!(store.get_workflow(&WorkflowId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_workflow_applies_mutation() {
        let store = InMemoryStore::new();
        let wf = sample_workflow();
        store.save_workflow(&wf).await.unwrap();

        let updated = store
            .update_workflow(&wf.id, |w| {
                w.status = WorkflowStatus::Running;
                w.log(EventType::WorkflowStarted, None, serde_json::Value::Null);
            })
            .await
            .unwrap();
        assert_eq!(updated.status, WorkflowStatus::Running);
        assert_eq!(updated.execution_log.len(), 1);

        let missing = store.update_workflow(&WorkflowId::new(), |_| {}).await;
        assert!(matches!(missing, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn update_status_and_append_log() {
        let store = InMemoryStore::new();
        let wf = sample_workflow();
        store.save_workflow(&wf).await.unwrap();

        store
            .update_workflow_status(&wf.id, WorkflowStatus::Running, Some(1))
            .await
            .unwrap();
        store
            .append_log(
                &wf.id,
                &ExecutionLogEntry::new(EventType::StepStarted, Some("review"), serde_json::Value::Null),
            )
            .await
            .unwrap();

        let loaded = store.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.current_step, 1);
        assert_eq!(loaded.execution_log[0].step_id.as_deref(), Some("review"));
    }

    #[tokio::test]
    async fn duplicate_pending_request_conflicts() {
        let store = InMemoryStore::new();
        let wf_id = WorkflowId::new();
        store.save_approval_request(&sample_request(wf_id)).await.unwrap();

        let second = store.save_approval_request(&sample_request(wf_id)).await;
        assert!(matches!(second, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn new_request_allowed_after_resolution() {
        let store = InMemoryStore::new();
        let wf_id = WorkflowId::new();
        let first = sample_request(wf_id);
        store.save_approval_request(&first).await.unwrap();
        store
            .update_approval_status(&first.id, ApprovalStatus::Timeout)
            .await
            .unwrap();

        store.save_approval_request(&sample_request(wf_id)).await.unwrap();
        assert_eq!(store.list_pending_approvals().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_cas_only_from_pending() {
        let store = InMemoryStore::new();
        let req = sample_request(WorkflowId::new());
        store.save_approval_request(&req).await.unwrap();

        let resolved = store
            .update_approval_status(&req.id, ApprovalStatus::Approved)
            .await
            .unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert!(resolved.resolved_at.is_some());

        let second = store
            .update_approval_status(&req.id, ApprovalStatus::Timeout)
            .await;
        assert!(matches!(second, Err(RepositoryError::Conflict(_))));

        let missing = store
            .update_approval_status(&Uuid::now_v7(), ApprovalStatus::Approved)
            .await;
        assert!(matches!(missing, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn responses_are_listed_in_order() {
        let store = InMemoryStore::new();
        let req = sample_request(WorkflowId::new());
        store.save_approval_request(&req).await.unwrap();

        let first = ApprovalResponse::new(req.id, &ApprovalDecision::approve("alice"));
        let second = ApprovalResponse::new(req.id, &ApprovalDecision::reject("bob", None));
        store.save_approval_response(&first).await.unwrap();
        store.save_approval_response(&second).await.unwrap();

        let listed = store.list_approval_responses(&req.id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].approver, "alice");
        assert_eq!(listed[1].action, ApprovalAction::Reject);
    }
}
