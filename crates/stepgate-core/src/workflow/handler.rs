//! Task and compensation handler traits, plus boxed wrappers for dynamic
//! dispatch.
//!
//! Follows the blanket-impl pattern used for boxed ports:
//! 1. Define an object-safe `*Dyn` trait with boxed futures
//! 2. Blanket-impl it for every implementor of the RPITIT trait
//! 3. `Box*` wraps `Box<dyn *Dyn>` and delegates

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use stepgate_types::workflow::{Step, WorkflowId};

use super::error::{CompensationError, ExecutionError};

// ---------------------------------------------------------------------------
// ActionType
// ---------------------------------------------------------------------------

/// The dispatch key for task and compensation handlers.
///
/// Parsed from `Step::action_type`. Anything not in the well-known set is
/// carried as `Custom` and resolved against the registry like any other key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionType {
    ValidateData,
    ProcessData,
    FraudDetection,
    DeploySystem,
    Custom(String),
}

impl ActionType {
    /// Action types every deployment is expected to register a handler for.
    pub fn well_known() -> [ActionType; 4] {
        [
            ActionType::ValidateData,
            ActionType::ProcessData,
            ActionType::FraudDetection,
            ActionType::DeploySystem,
        ]
    }

    pub fn as_str(&self) -> &str {
        match self {
            ActionType::ValidateData => "validate_data",
            ActionType::ProcessData => "process_data",
            ActionType::FraudDetection => "fraud_detection",
            ActionType::DeploySystem => "deploy_system",
            ActionType::Custom(s) => s,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "validate_data" => ActionType::ValidateData,
            "process_data" => ActionType::ProcessData,
            "fraud_detection" => ActionType::FraudDetection,
            "deploy_system" => ActionType::DeploySystem,
            other => ActionType::Custom(other.to_string()),
        })
    }
}

impl From<&str> for ActionType {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(action) => action,
            Err(never) => match never {},
        }
    }
}

// ---------------------------------------------------------------------------
// Contexts and outcomes
// ---------------------------------------------------------------------------

/// Input handed to a task handler for one attempt of one step.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub workflow_id: WorkflowId,
    pub step_id: String,
    pub action_type: ActionType,
    /// Workflow metadata overlaid with the step's own metadata.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TaskContext {
    pub fn for_step(
        workflow_id: WorkflowId,
        step: &Step,
        workflow_metadata: &HashMap<String, serde_json::Value>,
    ) -> Self {
        let mut metadata = workflow_metadata.clone();
        metadata.extend(step.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            workflow_id,
            step_id: step.id.clone(),
            action_type: ActionType::from(step.action_type.as_str()),
            metadata,
        }
    }
}

/// Result shape every task handler returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    pub result: serde_json::Value,
}

impl TaskOutcome {
    pub fn ok(result: serde_json::Value) -> Self {
        Self { success: true, result }
    }

    pub fn failed(result: serde_json::Value) -> Self {
        Self {
            success: false,
            result,
        }
    }
}

/// Input handed to a compensation handler.
#[derive(Debug, Clone)]
pub struct CompensationContext {
    pub workflow_id: WorkflowId,
    pub step_index: usize,
    pub step: Step,
    pub metadata: HashMap<String, serde_json::Value>,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// TaskHandler
// ---------------------------------------------------------------------------

/// Executes the automated work for one action type.
///
/// Implementations must be cancellable at any await point (the engine drops
/// the future on abort or timeout) and must not mutate workflow state except
/// through the returned payload.
pub trait TaskHandler: Send + Sync {
    fn name(&self) -> &str;

    fn execute(
        &self,
        ctx: &TaskContext,
    ) -> impl Future<Output = Result<TaskOutcome, ExecutionError>> + Send;
}

/// Object-safe version of [`TaskHandler`] with boxed futures.
pub trait TaskHandlerDyn: Send + Sync {
    fn name(&self) -> &str;

    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a TaskContext,
    ) -> Pin<Box<dyn Future<Output = Result<TaskOutcome, ExecutionError>> + Send + 'a>>;
}

impl<T: TaskHandler> TaskHandlerDyn for T {
    fn name(&self) -> &str {
        TaskHandler::name(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a TaskContext,
    ) -> Pin<Box<dyn Future<Output = Result<TaskOutcome, ExecutionError>> + Send + 'a>> {
        Box::pin(self.execute(ctx))
    }
}

/// Type-erased task handler for runtime registration.
pub struct BoxTaskHandler {
    inner: Box<dyn TaskHandlerDyn + Send + Sync>,
}

impl BoxTaskHandler {
    pub fn new<T: TaskHandler + 'static>(handler: T) -> Self {
        Self {
            inner: Box::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutcome, ExecutionError> {
        self.inner.execute_boxed(ctx).await
    }
}

// ---------------------------------------------------------------------------
// CompensationHandler
// ---------------------------------------------------------------------------

/// Undoes the side effects of one completed automated step.
pub trait CompensationHandler: Send + Sync {
    fn name(&self) -> &str;

    fn compensate(
        &self,
        ctx: &CompensationContext,
    ) -> impl Future<Output = Result<serde_json::Value, CompensationError>> + Send;
}

/// Object-safe version of [`CompensationHandler`] with boxed futures.
pub trait CompensationHandlerDyn: Send + Sync {
    fn name(&self) -> &str;

    fn compensate_boxed<'a>(
        &'a self,
        ctx: &'a CompensationContext,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, CompensationError>> + Send + 'a>>;
}

impl<T: CompensationHandler> CompensationHandlerDyn for T {
    fn name(&self) -> &str {
        CompensationHandler::name(self)
    }

    fn compensate_boxed<'a>(
        &'a self,
        ctx: &'a CompensationContext,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, CompensationError>> + Send + 'a>> {
        Box::pin(self.compensate(ctx))
    }
}

/// Type-erased compensation handler for runtime registration.
pub struct BoxCompensationHandler {
    inner: Box<dyn CompensationHandlerDyn + Send + Sync>,
}

impl BoxCompensationHandler {
    pub fn new<T: CompensationHandler + 'static>(handler: T) -> Self {
        Self {
            inner: Box::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn compensate(
        &self,
        ctx: &CompensationContext,
    ) -> Result<serde_json::Value, CompensationError> {
        self.inner.compensate_boxed(ctx).await
    }
}
