//! Recording handlers shared by engine and service tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stepgate_types::workflow::{NewStep, NewWorkflow};

use super::error::{CompensationError, ExecutionError};
use super::handler::{
    CompensationContext, CompensationHandler, TaskContext, TaskHandler, TaskOutcome,
};

/// Task handler that records every step it runs and fails the listed steps.
#[derive(Clone, Default)]
pub(crate) struct ScriptedTask {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub fail_steps: Vec<String>,
    pub delay: Option<Duration>,
}

impl ScriptedTask {
    pub fn failing(steps: &[&str]) -> Self {
        Self {
            fail_steps: steps.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl TaskHandler for ScriptedTask {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutcome, ExecutionError> {
        self.calls.lock().unwrap().push(ctx.step_id.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_steps.contains(&ctx.step_id) {
            return Ok(TaskOutcome::failed(serde_json::json!({ "reason": "scripted failure" })));
        }
        Ok(TaskOutcome::ok(serde_json::json!({ "step": ctx.step_id })))
    }
}

/// Compensation handler that records the order of compensated steps.
#[derive(Clone, Default)]
pub(crate) struct RecordingCompensation {
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingCompensation {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CompensationHandler for RecordingCompensation {
    fn name(&self) -> &str {
        "recording"
    }

    async fn compensate(&self, ctx: &CompensationContext) -> Result<serde_json::Value, CompensationError> {
        self.calls.lock().unwrap().push(ctx.step.id.clone());
        Ok(serde_json::json!({ "undone": ctx.step.id }))
    }
}

pub(crate) fn draft(name: &str, steps: Vec<NewStep>) -> NewWorkflow {
    NewWorkflow {
        name: name.to_string(),
        description: None,
        priority: 0,
        metadata: HashMap::new(),
        steps,
    }
}
