//! Approval repository trait definition.

use stepgate_types::approval::{ApprovalRequest, ApprovalResponse, ApprovalStatus};
use stepgate_types::error::RepositoryError;
use uuid::Uuid;

/// Repository trait for approval requests and responses.
pub trait ApprovalRepository: Send + Sync {
    /// Insert a new approval request.
    ///
    /// Returns `RepositoryError::Conflict` if a pending request already
    /// exists for the same workflow and step.
    fn save_approval_request(
        &self,
        request: &ApprovalRequest,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_approval_request(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ApprovalRequest>, RepositoryError>> + Send;

    /// Compare-and-set a request from `Pending` to a terminal `status`,
    /// stamping `resolved_at`.
    ///
    /// Returns `RepositoryError::Conflict` if the request is no longer
    /// pending (someone else resolved it first) and `RepositoryError::NotFound`
    /// if it does not exist.
    fn update_approval_status(
        &self,
        id: &Uuid,
        status: ApprovalStatus,
    ) -> impl std::future::Future<Output = Result<ApprovalRequest, RepositoryError>> + Send;

    /// Record a decision. Responses are never modified afterwards.
    fn save_approval_response(
        &self,
        response: &ApprovalResponse,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// All responses recorded for a request, oldest first.
    fn list_approval_responses(
        &self,
        request_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<ApprovalResponse>, RepositoryError>> + Send;

    /// All pending requests, newest first.
    fn list_pending_approvals(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ApprovalRequest>, RepositoryError>> + Send;
}
