//! SQLite approval repository implementation.
//!
//! The pending-to-terminal transition is a single conditional UPDATE, so the
//! database arbitrates concurrent decisions and timeouts for the same request.

use chrono::Utc;
use sqlx::Row;
use stepgate_core::repository::ApprovalRepository;
use stepgate_types::approval::{ApprovalAction, ApprovalRequest, ApprovalResponse, ApprovalStatus};
use stepgate_types::error::RepositoryError;
use stepgate_types::workflow::WorkflowId;
use uuid::Uuid;

use super::store::{
    SqliteStore, format_datetime, from_json, map_sqlx, parse_datetime, parse_uuid, to_json,
};

const REQUEST_COLUMNS: &str =
    "id, workflow_id, step_id, approval_level, metadata, requested_at, timeout_at, status, resolved_at";

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn decode_request(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let get = |e: sqlx::Error| RepositoryError::Query(e.to_string());

    let id: String = row.try_get("id").map_err(get)?;
    let workflow_id: String = row.try_get("workflow_id").map_err(get)?;
    let level: i64 = row.try_get("approval_level").map_err(get)?;
    let metadata: String = row.try_get("metadata").map_err(get)?;
    let requested_at: String = row.try_get("requested_at").map_err(get)?;
    let timeout_at: String = row.try_get("timeout_at").map_err(get)?;
    let status: String = row.try_get("status").map_err(get)?;
    let resolved_at: Option<String> = row.try_get("resolved_at").map_err(get)?;

    Ok(ApprovalRequest {
        id: parse_uuid(&id)?,
        workflow_id: WorkflowId::from_uuid(parse_uuid(&workflow_id)?),
        step_id: row.try_get("step_id").map_err(get)?,
        approval_level: u8::try_from(level)
            .map_err(|_| RepositoryError::Query(format!("invalid approval_level: {level}")))?,
        metadata: from_json(&metadata, "metadata")?,
        requested_at: parse_datetime(&requested_at)?,
        timeout_at: parse_datetime(&timeout_at)?,
        status: status.parse().map_err(RepositoryError::Query)?,
        resolved_at: resolved_at.as_deref().map(parse_datetime).transpose()?,
    })
}

fn decode_response(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalResponse, RepositoryError> {
    let get = |e: sqlx::Error| RepositoryError::Query(e.to_string());

    let id: String = row.try_get("id").map_err(get)?;
    let request_id: String = row.try_get("request_id").map_err(get)?;
    let action: String = row.try_get("action").map_err(get)?;
    let timestamp: String = row.try_get("timestamp").map_err(get)?;
    let late: i64 = row.try_get("late").map_err(get)?;

    Ok(ApprovalResponse {
        id: parse_uuid(&id)?,
        request_id: parse_uuid(&request_id)?,
        action: action.parse::<ApprovalAction>().map_err(RepositoryError::Query)?,
        approver: row.try_get("approver").map_err(get)?,
        comment: row.try_get("comment").map_err(get)?,
        timestamp: parse_datetime(&timestamp)?,
        late: late != 0,
    })
}

// ---------------------------------------------------------------------------
// ApprovalRepository impl
// ---------------------------------------------------------------------------

impl ApprovalRepository for SqliteStore {
    async fn save_approval_request(&self, request: &ApprovalRequest) -> Result<(), RepositoryError> {
        sqlx::query(&format!(
            "INSERT INTO approval_requests ({REQUEST_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(request.id.to_string())
        .bind(request.workflow_id.to_string())
        .bind(&request.step_id)
        .bind(request.approval_level as i64)
        .bind(to_json(&request.metadata, "metadata")?)
        .bind(format_datetime(&request.requested_at))
        .bind(format_datetime(&request.timeout_at))
        .bind(request.status.to_string())
        .bind(request.resolved_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match map_sqlx(e) {
            RepositoryError::Conflict(_) => RepositoryError::Conflict(format!(
                "pending approval already exists for step '{}'",
                request.step_id
            )),
            other => other,
        })?;

        Ok(())
    }

    async fn get_approval_request(&self, id: &Uuid) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM approval_requests WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;

        row.as_ref().map(decode_request).transpose()
    }

    async fn update_approval_status(
        &self,
        id: &Uuid,
        status: ApprovalStatus,
    ) -> Result<ApprovalRequest, RepositoryError> {
        let row = sqlx::query(&format!(
            "UPDATE approval_requests SET status = ?, resolved_at = ? \
             WHERE id = ? AND status = 'pending' RETURNING {REQUEST_COLUMNS}"
        ))
        .bind(status.to_string())
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        if let Some(row) = row {
            return decode_request(&row);
        }

        // Lost the race or never existed.
        let current: Option<String> = sqlx::query_scalar("SELECT status FROM approval_requests WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(map_sqlx)?;

        match current {
            Some(current) => Err(RepositoryError::Conflict(format!(
                "approval request already {current}"
            ))),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn save_approval_response(&self, response: &ApprovalResponse) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO approval_responses (id, request_id, action, approver, comment, timestamp, late)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(response.id.to_string())
        .bind(response.request_id.to_string())
        .bind(response.action.to_string())
        .bind(&response.approver)
        .bind(&response.comment)
        .bind(format_datetime(&response.timestamp))
        .bind(response.late as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn list_approval_responses(
        &self,
        request_id: &Uuid,
    ) -> Result<Vec<ApprovalResponse>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT id, request_id, action, approver, comment, timestamp, late
               FROM approval_responses WHERE request_id = ?
               ORDER BY timestamp ASC, id ASC"#,
        )
        .bind(request_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(decode_response).collect()
    }

    async fn list_pending_approvals(&self) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_requests WHERE status = 'pending' \
             ORDER BY requested_at DESC, id DESC"
        ))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(decode_request).collect()
    }
}
