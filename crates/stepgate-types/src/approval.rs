//! Approval request and response types.
//!
//! An `ApprovalRequest` is created when a workflow reaches a step with
//! `requires_approval = true`. It moves from `Pending` to exactly one of the
//! terminal statuses and never back.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::WorkflowId;

/// A request for a human decision on one step of one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub workflow_id: WorkflowId,
    pub step_id: String,
    pub approval_level: u8,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    pub requested_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    /// Build a new pending request expiring `timeout` after now.
    pub fn new(
        workflow_id: WorkflowId,
        step_id: &str,
        approval_level: u8,
        metadata: HashMap<String, serde_json::Value>,
        timeout: std::time::Duration,
    ) -> Self {
        let requested_at = Utc::now();
        let timeout_at = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|d| requested_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            step_id: step_id.to_string(),
            approval_level,
            metadata,
            requested_at,
            timeout_at,
            status: ApprovalStatus::Pending,
            resolved_at: None,
        }
    }

    /// Whether the deadline has passed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.timeout_at
    }
}

/// Approval request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Timeout,
    Cancelled,
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }

    /// `Timeout` and `Cancelled`: the request ended without a decision.
    pub fn is_expired(self) -> bool {
        matches!(self, ApprovalStatus::Timeout | ApprovalStatus::Cancelled)
    }

    /// The outcome a waiter observes for a terminal status.
    pub fn outcome(self) -> Option<ApprovalOutcome> {
        match self {
            ApprovalStatus::Pending => None,
            ApprovalStatus::Approved => Some(ApprovalOutcome::Approved),
            ApprovalStatus::Rejected => Some(ApprovalOutcome::Rejected),
            ApprovalStatus::Timeout => Some(ApprovalOutcome::TimedOut),
            ApprovalStatus::Cancelled => Some(ApprovalOutcome::Cancelled),
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalStatus::Pending => write!(f, "pending"),
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
            ApprovalStatus::Timeout => write!(f, "timeout"),
            ApprovalStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            "timeout" => Ok(ApprovalStatus::Timeout),
            "cancelled" => Ok(ApprovalStatus::Cancelled),
            other => Err(format!("invalid approval status: '{other}'")),
        }
    }
}

/// A human decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve,
    Reject,
}

impl ApprovalAction {
    /// The request status this action resolves to.
    pub fn status(self) -> ApprovalStatus {
        match self {
            ApprovalAction::Approve => ApprovalStatus::Approved,
            ApprovalAction::Reject => ApprovalStatus::Rejected,
        }
    }
}

impl fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalAction::Approve => write!(f, "approve"),
            ApprovalAction::Reject => write!(f, "reject"),
        }
    }
}

impl FromStr for ApprovalAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "approve" | "approved" => Ok(ApprovalAction::Approve),
            "reject" | "rejected" => Ok(ApprovalAction::Reject),
            other => Err(format!("invalid approval action: '{other}'")),
        }
    }
}

/// A recorded decision. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub id: Uuid,
    pub request_id: Uuid,
    pub action: ApprovalAction,
    pub approver: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Recorded after the request had already expired; audit only.
    #[serde(default)]
    pub late: bool,
}

impl ApprovalResponse {
    pub fn new(request_id: Uuid, decision: &ApprovalDecision) -> Self {
        Self {
            id: Uuid::now_v7(),
            request_id,
            action: decision.action,
            approver: decision.approver.clone(),
            comment: decision.comment.clone(),
            timestamp: Utc::now(),
            late: false,
        }
    }
}

/// Inbound decision payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub action: ApprovalAction,
    pub approver: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ApprovalDecision {
    pub fn approve(approver: &str) -> Self {
        Self {
            action: ApprovalAction::Approve,
            approver: approver.to_string(),
            comment: None,
        }
    }

    pub fn reject(approver: &str, comment: Option<&str>) -> Self {
        Self {
            action: ApprovalAction::Reject,
            approver: approver.to_string(),
            comment: comment.map(str::to_owned),
        }
    }
}

/// What a waiter on an approval request observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Approved,
    Rejected,
    TimedOut,
    Cancelled,
}

impl ApprovalOutcome {
    pub fn is_approved(self) -> bool {
        matches!(self, ApprovalOutcome::Approved)
    }
}

impl fmt::Display for ApprovalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalOutcome::Approved => write!(f, "approved"),
            ApprovalOutcome::Rejected => write!(f, "rejected"),
            ApprovalOutcome::TimedOut => write!(f, "timed out"),
            ApprovalOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}
