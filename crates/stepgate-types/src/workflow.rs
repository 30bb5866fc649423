//! Workflow domain types for Stepgate.
//!
//! A `Workflow` is an ordered list of `Step`s executed strictly in sequence.
//! Automated steps dispatch to a task handler; approval steps block on a
//! human decision. Every transition is recorded in the append-only
//! `execution_log`, and a `RollbackSnapshot` is attached when the workflow
//! is compensated.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;

// ---------------------------------------------------------------------------
// WorkflowId
// ---------------------------------------------------------------------------

/// Unique identifier for a workflow, wrapping a UUID v7 (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    /// Create a new WorkflowId using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create a WorkflowId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkflowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A persisted workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: WorkflowStatus,
    /// Ordered steps; index order is execution order.
    pub steps: Vec<Step>,
    /// Index of the step currently executing (or last executed).
    ///
    /// Never decreases while the workflow is running.
    pub current_step: usize,
    /// Higher runs first when several workflows are started together.
    #[serde(default)]
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Append-only audit trail. Entries are never removed or reordered.
    #[serde(default)]
    pub execution_log: Vec<ExecutionLogEntry>,
    /// Captured at the start of a rollback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_data: Option<RollbackSnapshot>,
}

impl Workflow {
    /// Build a fresh `Pending` workflow from a validated draft.
    ///
    /// Steps without an explicit timeout take the configured default for
    /// their kind.
    pub fn from_draft(draft: NewWorkflow, config: &EngineConfig) -> Self {
        Self {
            id: WorkflowId::new(),
            name: draft.name,
            description: draft.description,
            status: WorkflowStatus::Pending,
            steps: draft
                .steps
                .into_iter()
                .map(|s| Step::from_draft(s, config))
                .collect(),
            current_step: 0,
            priority: draft.priority,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata: draft.metadata,
            execution_log: Vec::new(),
            rollback_data: None,
        }
    }

    /// Append an entry to the execution log, stamped with the current time.
    pub fn log(&mut self, event_type: EventType, step_id: Option<&str>, data: serde_json::Value) {
        self.execution_log.push(ExecutionLogEntry::new(event_type, step_id, data));
    }

    /// Move `current_step` forward to `index`.
    ///
    /// Returns `false` (and leaves the workflow untouched) if `index` would
    /// move the cursor backwards.
    pub fn advance_to(&mut self, index: usize) -> bool {
        if index < self.current_step {
            return false;
        }
        self.current_step = index;
        true
    }

    /// Apply a status transition if the state machine allows it.
    pub fn transition(&mut self, next: WorkflowStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Count of log entries with the given event type.
    pub fn count_events(&self, event_type: EventType) -> usize {
        self.execution_log
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    /// The step at `current_step`, if any.
    pub fn current(&self) -> Option<&Step> {
        self.steps.get(self.current_step)
    }
}

/// Rejected status transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid workflow transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
}

// ---------------------------------------------------------------------------
// WorkflowStatus
// ---------------------------------------------------------------------------

/// Workflow lifecycle states.
///
/// ```text
/// Pending -> Running <-> AwaitingApproval
///    |          |
///    v          v
/// Cancelled  Completed | Failed -> RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    AwaitingApproval,
    Completed,
    Failed,
    RolledBack,
    Cancelled,
}

impl WorkflowStatus {
    /// Whether no further step execution can happen.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed
                | WorkflowStatus::Failed
                | WorkflowStatus::RolledBack
                | WorkflowStatus::Cancelled
        )
    }

    /// Whether the engine is (or was, before a crash) executing steps.
    pub fn is_active(self) -> bool {
        matches!(self, WorkflowStatus::Running | WorkflowStatus::AwaitingApproval)
    }

    /// Allowed transitions. `Failed -> RolledBack` is the only way out of a
    /// terminal status.
    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, AwaitingApproval)
                | (AwaitingApproval, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (AwaitingApproval, Failed)
                | (Failed, RolledBack)
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::AwaitingApproval => "awaiting_approval",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::RolledBack => "rolled_back",
            WorkflowStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(WorkflowStatus::Pending),
            "running" => Ok(WorkflowStatus::Running),
            "awaiting_approval" => Ok(WorkflowStatus::AwaitingApproval),
            "completed" => Ok(WorkflowStatus::Completed),
            "failed" => Ok(WorkflowStatus::Failed),
            "rolled_back" => Ok(WorkflowStatus::RolledBack),
            "cancelled" => Ok(WorkflowStatus::Cancelled),
            other => Err(format!("invalid workflow status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A single step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique within its workflow (e.g. "fraud_check").
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Tag used to select the task and compensation handlers.
    pub action_type: String,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default = "default_approval_level")]
    pub approval_level: u8,
    /// Per-attempt timeout for automated steps; approval wait for gated steps.
    pub timeout_secs: u64,
    /// Failed attempts so far. Bounded by the engine's retry policy.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Step {
    fn from_draft(draft: NewStep, config: &EngineConfig) -> Self {
        let default_timeout = if draft.requires_approval {
            config.default_approval_timeout_secs
        } else {
            config.default_task_timeout_secs
        };
        Self {
            timeout_secs: draft.timeout_secs.unwrap_or(default_timeout),
            id: draft.id,
            name: draft.name,
            description: draft.description,
            action_type: draft.action_type,
            requires_approval: draft.requires_approval,
            approval_level: draft.approval_level,
            retry_count: 0,
            metadata: draft.metadata,
        }
    }
}

fn default_approval_level() -> u8 {
    1
}

// ---------------------------------------------------------------------------
// Drafts (creation input)
// ---------------------------------------------------------------------------

/// Input for creating a workflow, as read from a TOML/JSON definition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkflow {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub steps: Vec<NewStep>,
}

/// Input for a single step in a [`NewWorkflow`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStep {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub action_type: String,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default = "default_approval_level")]
    pub approval_level: u8,
    /// Falls back to the engine default for the step's kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NewStep {
    /// Convenience constructor for an automated step with defaults.
    pub fn automated(id: &str, action_type: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            action_type: action_type.to_string(),
            requires_approval: false,
            approval_level: default_approval_level(),
            timeout_secs: None,
            metadata: HashMap::new(),
        }
    }

    /// Convenience constructor for an approval-gated step.
    pub fn approval(id: &str, level: u8, timeout_secs: u64) -> Self {
        Self {
            requires_approval: true,
            approval_level: level,
            timeout_secs: Some(timeout_secs),
            ..Self::automated(id, "approval")
        }
    }
}

// ---------------------------------------------------------------------------
// Execution log
// ---------------------------------------------------------------------------

/// Kinds of entries recorded in a workflow's execution log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkflowStarted,
    StepStarted,
    StepCompleted,
    StepRetry,
    TaskFailed,
    StepExecutionError,
    ApprovalRequested,
    ApprovalResolved,
    ApprovalTimeout,
    LateApprovalDecision,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowCancelled,
    RollbackStarted,
    CompensationExecuted,
    CompensationFailed,
    CompensationSkipped,
    RollbackCompleted,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Mirrors the serde representation.
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        f.write_str(&s)
    }
}

/// One audit record in a workflow's execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ExecutionLogEntry {
    pub fn new(event_type: EventType, step_id: Option<&str>, data: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            step_id: step_id.map(str::to_owned),
            data,
        }
    }
}

// ---------------------------------------------------------------------------
// Rollback snapshot
// ---------------------------------------------------------------------------

/// State captured when a rollback begins, kept on the workflow for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackSnapshot {
    pub snapshot_timestamp: DateTime<Utc>,
    /// Status at the moment rollback began.
    pub status: WorkflowStatus,
    pub current_step: usize,
    /// Ids of the steps that will be visited by the compensation sweep.
    pub completed_steps: Vec<String>,
    /// The last few log entries before rollback began.
    pub log_tail: Vec<ExecutionLogEntry>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RollbackSnapshot {
    /// Capture a snapshot of `workflow`, keeping at most `tail` log entries.
    pub fn capture(workflow: &Workflow, tail: usize) -> Self {
        let visited = workflow.steps.len().min(workflow.current_step + 1);
        let start = workflow.execution_log.len().saturating_sub(tail);
        Self {
            snapshot_timestamp: Utc::now(),
            status: workflow.status,
            current_step: workflow.current_step,
            completed_steps: workflow.steps[..visited]
                .iter()
                .map(|s| s.id.clone())
                .collect(),
            log_tail: workflow.execution_log[start..].to_vec(),
            metadata: workflow.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_workflow() -> Workflow {
        Workflow::from_draft(
            NewWorkflow {
                name: "payments".to_string(),
                description: None,
                priority: 0,
                metadata: HashMap::new(),
                steps: vec![
                    NewStep::automated("validate", "validate_data"),
                    NewStep::automated("process", "process_data"),
                    NewStep::approval("final_approval", 2, 60),
                ],
            },
            &EngineConfig::default(),
        )
    }

    #[test]
    fn test_workflow_id_display_roundtrip() {
        let id = WorkflowId::new();
        let parsed: WorkflowId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_workflow_status_roundtrip() {
        for status in [
            WorkflowStatus::Pending,
            WorkflowStatus::Running,
            WorkflowStatus::AwaitingApproval,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::RolledBack,
            WorkflowStatus::Cancelled,
        ] {
            let parsed: WorkflowStatus = status.to_string().parse().unwrap();
            assert_eq!(status, parsed);
        }
        assert!("bogus".parse::<WorkflowStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::RolledBack.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(!WorkflowStatus::AwaitingApproval.is_terminal());
    }

    #[test]
    fn test_only_failed_leaves_terminal() {
        assert!(WorkflowStatus::Failed.can_transition_to(WorkflowStatus::RolledBack));
        assert!(!WorkflowStatus::Completed.can_transition_to(WorkflowStatus::RolledBack));
        assert!(!WorkflowStatus::RolledBack.can_transition_to(WorkflowStatus::Running));
        assert!(!WorkflowStatus::Cancelled.can_transition_to(WorkflowStatus::Running));
    }

    #[test]
    fn test_transition_rejects_invalid() {
        let mut wf = sample_workflow();
        let err = wf.transition(WorkflowStatus::Completed).unwrap_err();
        assert_eq!(err.from, WorkflowStatus::Pending);
        assert_eq!(wf.status, WorkflowStatus::Pending);
        wf.transition(WorkflowStatus::Running).unwrap();
        assert_eq!(wf.status, WorkflowStatus::Running);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut wf = sample_workflow();
        assert!(wf.advance_to(2));
        assert!(!wf.advance_to(1));
        assert_eq!(wf.current_step, 2);
        assert!(wf.advance_to(2));
    }

    #[test]
    fn test_draft_defaults() {
        let json = r#"{"name":"x","steps":[
            {"id":"a","name":"A","action_type":"generic"},
            {"id":"b","name":"B","action_type":"approval","requires_approval":true}
        ]}"#;
        let draft: NewWorkflow = serde_json::from_str(json).unwrap();
        assert_eq!(draft.steps[0].approval_level, 1);
        assert!(draft.steps[0].timeout_secs.is_none());
        assert!(!draft.steps[0].requires_approval);

        let wf = Workflow::from_draft(draft, &EngineConfig::default());
        assert_eq!(wf.steps[0].timeout_secs, 3600);
        assert_eq!(wf.steps[1].timeout_secs, 86_400);
        assert_eq!(wf.status, WorkflowStatus::Pending);
    }

    #[test]
    fn test_explicit_timeout_wins() {
        let wf = sample_workflow();
        assert_eq!(wf.steps[2].timeout_secs, 60);
    }

    #[test]
    fn test_event_type_display_matches_serde() {
        assert_eq!(EventType::WorkflowFailed.to_string(), "workflow_failed");
        assert_eq!(
            EventType::LateApprovalDecision.to_string(),
            "late_approval_decision"
        );
    }

    #[test]
    fn test_snapshot_keeps_log_tail() {
        let mut wf = sample_workflow();
        for i in 0..15 {
            wf.log(EventType::StepStarted, None, serde_json::json!({ "i": i }));
        }
        wf.advance_to(1);
        let snap = RollbackSnapshot::capture(&wf, 10);
        assert_eq!(snap.log_tail.len(), 10);
        assert_eq!(snap.log_tail[0].data["i"], 5);
        assert_eq!(snap.completed_steps, vec!["validate", "process"]);
    }
}
