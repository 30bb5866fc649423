//! Workflow repository trait definition.
//!
//! Defines the storage interface for workflow records. The infrastructure
//! layer (stepgate-infra) implements this trait with SQLite persistence;
//! `memory::InMemoryStore` implements it for tests and ephemeral runs.

use stepgate_types::error::RepositoryError;
use stepgate_types::workflow::{ExecutionLogEntry, Workflow, WorkflowId, WorkflowStatus};

/// Repository trait for workflow persistence.
///
/// A workflow record (steps, log, snapshot included) is always written as a
/// unit. Uses native async fn in traits (Rust 2024 edition, no async_trait
/// macro).
pub trait WorkflowRepository: Send + Sync {
    /// Upsert a workflow record (insert or replace by ID), including its log.
    fn save_workflow(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a workflow by ID.
    fn get_workflow(
        &self,
        id: &WorkflowId,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    /// List all workflows, newest first.
    fn list_workflows(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    /// Set the status and optionally `current_step` of a workflow.
    ///
    /// Returns `RepositoryError::NotFound` if the workflow does not exist.
    fn update_workflow_status(
        &self,
        id: &WorkflowId,
        status: WorkflowStatus,
        current_step: Option<usize>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Atomic read-modify-write of a single workflow record.
    ///
    /// `mutate` runs against the latest stored copy and the result is
    /// persisted before this returns. No other writer observes an
    /// intermediate state. Returns the updated workflow.
    fn update_workflow<F>(
        &self,
        id: &WorkflowId,
        mutate: F,
    ) -> impl std::future::Future<Output = Result<Workflow, RepositoryError>> + Send
    where
        F: FnOnce(&mut Workflow) + Send;

    /// Append one entry to a workflow's execution log.
    fn append_log(
        &self,
        id: &WorkflowId,
        entry: &ExecutionLogEntry,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
