//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `stepgate-core`. Steps, metadata,
//! the execution log and the rollback snapshot are stored as JSON columns;
//! scalar state (status, current step, timestamps) lives in its own columns
//! so it can be filtered and indexed.

use chrono::Utc;
use sqlx::Row;
use stepgate_core::repository::WorkflowRepository;
use stepgate_types::error::RepositoryError;
use stepgate_types::workflow::{ExecutionLogEntry, Workflow, WorkflowId, WorkflowStatus};

use super::store::{
    SqliteStore, format_datetime, from_json, map_sqlx, parse_datetime, parse_uuid, to_json,
};

const SELECT_WORKFLOW: &str = r#"SELECT id, name, description, status, current_step, priority,
       steps, metadata, execution_log, rollback_data, created_at, started_at, completed_at
FROM workflows"#;

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct WorkflowRow {
    id: String,
    name: String,
    description: Option<String>,
    status: String,
    current_step: i64,
    priority: i64,
    steps: String,
    metadata: String,
    execution_log: String,
    rollback_data: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl WorkflowRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            status: row.try_get("status")?,
            current_step: row.try_get("current_step")?,
            priority: row.try_get("priority")?,
            steps: row.try_get("steps")?,
            metadata: row.try_get("metadata")?,
            execution_log: row.try_get("execution_log")?,
            rollback_data: row.try_get("rollback_data")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_workflow(self) -> Result<Workflow, RepositoryError> {
        let status: WorkflowStatus = self
            .status
            .parse()
            .map_err(RepositoryError::Query)?;

        Ok(Workflow {
            id: WorkflowId::from_uuid(parse_uuid(&self.id)?),
            name: self.name,
            description: self.description,
            status,
            steps: from_json(&self.steps, "steps")?,
            current_step: usize::try_from(self.current_step)
                .map_err(|_| RepositoryError::Query(format!("invalid current_step: {}", self.current_step)))?,
            priority: self.priority as i32,
            created_at: parse_datetime(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
            metadata: from_json(&self.metadata, "metadata")?,
            execution_log: from_json(&self.execution_log, "execution_log")?,
            rollback_data: self
                .rollback_data
                .as_deref()
                .map(|s| from_json(s, "rollback_data"))
                .transpose()?,
        })
    }
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<Workflow, RepositoryError> {
    WorkflowRow::from_row(row)
        .map_err(|e| RepositoryError::Query(e.to_string()))?
        .into_workflow()
}

/// Upsert every column of `workflow` using `executor`.
async fn write_workflow<'e, E>(executor: E, workflow: &Workflow) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let rollback_data = workflow
        .rollback_data
        .as_ref()
        .map(|s| to_json(s, "rollback_data"))
        .transpose()?;

    sqlx::query(
        r#"INSERT INTO workflows
           (id, name, description, status, current_step, priority, steps, metadata,
            execution_log, rollback_data, created_at, started_at, completed_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             description = excluded.description,
             status = excluded.status,
             current_step = excluded.current_step,
             priority = excluded.priority,
             steps = excluded.steps,
             metadata = excluded.metadata,
             execution_log = excluded.execution_log,
             rollback_data = excluded.rollback_data,
             started_at = excluded.started_at,
             completed_at = excluded.completed_at,
             updated_at = excluded.updated_at"#,
    )
    .bind(workflow.id.to_string())
    .bind(&workflow.name)
    .bind(&workflow.description)
    .bind(workflow.status.to_string())
    .bind(workflow.current_step as i64)
    .bind(workflow.priority as i64)
    .bind(to_json(&workflow.steps, "steps")?)
    .bind(to_json(&workflow.metadata, "metadata")?)
    .bind(to_json(&workflow.execution_log, "execution_log")?)
    .bind(rollback_data)
    .bind(format_datetime(&workflow.created_at))
    .bind(workflow.started_at.as_ref().map(format_datetime))
    .bind(workflow.completed_at.as_ref().map(format_datetime))
    .bind(format_datetime(&Utc::now()))
    .execute(executor)
    .await
    .map_err(map_sqlx)?;

    Ok(())
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteStore {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        write_workflow(&self.pool.writer, workflow).await
    }

    async fn get_workflow(&self, id: &WorkflowId) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_WORKFLOW} WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;

        row.as_ref().map(decode).transpose()
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, RepositoryError> {
        let rows = sqlx::query(&format!("{SELECT_WORKFLOW} ORDER BY created_at DESC, id DESC"))
            .fetch_all(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;

        rows.iter().map(decode).collect()
    }

    async fn update_workflow_status(
        &self,
        id: &WorkflowId,
        status: WorkflowStatus,
        current_step: Option<usize>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE workflows SET status = ?, current_step = COALESCE(?, current_step), updated_at = ? WHERE id = ?",
        )
        .bind(status.to_string())
        .bind(current_step.map(|s| s as i64))
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn update_workflow<F>(&self, id: &WorkflowId, mutate: F) -> Result<Workflow, RepositoryError>
    where
        F: FnOnce(&mut Workflow) + Send,
    {
        let mut tx = self.pool.writer.begin().await.map_err(map_sqlx)?;

        let row = sqlx::query(&format!("{SELECT_WORKFLOW} WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx)?
            .ok_or(RepositoryError::NotFound)?;
        let mut workflow = decode(&row)?;

        mutate(&mut workflow);

        write_workflow(&mut *tx, &workflow).await?;
        tx.commit().await.map_err(map_sqlx)?;
        Ok(workflow)
    }

    async fn append_log(&self, id: &WorkflowId, entry: &ExecutionLogEntry) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE workflows SET execution_log = json_insert(execution_log, '$[#]', json(?)), updated_at = ? WHERE id = ?",
        )
        .bind(to_json(entry, "log entry")?)
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}
