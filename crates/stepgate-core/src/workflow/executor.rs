//! Task executor: dispatches an automated step to its registered handler.
//!
//! Unregistered action types fall through to the generic handler, which
//! acknowledges the step without side effects. `missing_handlers` makes
//! that fallback visible at startup.

use std::collections::HashMap;
use std::time::Instant;

use super::error::ExecutionError;
use super::handler::{ActionType, BoxTaskHandler, TaskContext, TaskHandler, TaskOutcome};

/// Handler used for action types with no registration.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericTaskHandler;

impl TaskHandler for GenericTaskHandler {
    fn name(&self) -> &str {
        "generic"
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutcome, ExecutionError> {
        tracing::debug!(
            workflow_id = %ctx.workflow_id,
            step_id = %ctx.step_id,
            action_type = %ctx.action_type,
            "generic task handler"
        );
        Ok(TaskOutcome::ok(serde_json::json!({
            "action_type": ctx.action_type.as_str(),
            "status": "completed",
        })))
    }
}

/// Registry-backed dispatcher for automated steps.
pub struct TaskExecutor {
    handlers: HashMap<ActionType, BoxTaskHandler>,
    fallback: BoxTaskHandler,
}

impl TaskExecutor {
    /// Create an executor with no registrations and the generic fallback.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: BoxTaskHandler::new(GenericTaskHandler),
        }
    }

    /// Register a handler for an action type, replacing any previous one.
    pub fn register(&mut self, action_type: ActionType, handler: BoxTaskHandler) {
        self.handlers.insert(action_type, handler);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_handler<T: TaskHandler + 'static>(mut self, action_type: ActionType, handler: T) -> Self {
        self.register(action_type, BoxTaskHandler::new(handler));
        self
    }

    /// Replace the fallback used for unregistered action types.
    pub fn set_fallback(&mut self, handler: BoxTaskHandler) {
        self.fallback = handler;
    }

    /// Whether a dedicated handler exists for `action_type`.
    pub fn is_registered(&self, action_type: &ActionType) -> bool {
        self.handlers.contains_key(action_type)
    }

    /// Well-known action types that would fall back to the generic handler.
    pub fn missing_handlers(&self) -> Vec<ActionType> {
        ActionType::well_known()
            .into_iter()
            .filter(|a| !self.handlers.contains_key(a))
            .collect()
    }

    /// Names of all registered action types, sorted.
    pub fn registered(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(ActionType::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run the handler for `ctx.action_type`.
    ///
    /// A handler returning `success = false` is still `Ok`; the caller
    /// decides what a failed outcome means.
    pub async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutcome, ExecutionError> {
        let handler = self.handlers.get(&ctx.action_type).unwrap_or(&self.fallback);
        let started = Instant::now();

        let result = handler.execute(ctx).await;

        tracing::debug!(
            workflow_id = %ctx.workflow_id,
            step_id = %ctx.step_id,
            handler = handler.name(),
            duration_ms = started.elapsed().as_millis() as u64,
            ok = result.as_ref().is_ok_and(|o| o.success),
            "task handler finished"
        );

        result
    }
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new()
    }
}
