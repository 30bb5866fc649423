//! Built-in compensations, one per well-known action type.

use serde_json::json;
use stepgate_core::workflow::error::CompensationError;
use stepgate_core::workflow::handler::{CompensationContext, CompensationHandler};

fn undone(ctx: &CompensationContext, action: &str, message: &str) -> serde_json::Value {
    tracing::info!(
        workflow_id = %ctx.workflow_id,
        step_id = %ctx.step.id,
        step_index = ctx.step_index,
        action,
        message,
        "compensation applied"
    );
    json!({
        "compensation": action,
        "message": message,
        "step_index": ctx.step_index,
    })
}

/// Undoes `validate_data`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ValidationReset;

impl CompensationHandler for ValidationReset {
    fn name(&self) -> &str {
        "validation_reset"
    }

    async fn compensate(&self, ctx: &CompensationContext) -> Result<serde_json::Value, CompensationError> {
        Ok(undone(ctx, "validation_rollback", "Reset validation state"))
    }
}

/// Undoes `process_data`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataRevert;

impl CompensationHandler for DataRevert {
    fn name(&self) -> &str {
        "data_revert"
    }

    async fn compensate(&self, ctx: &CompensationContext) -> Result<serde_json::Value, CompensationError> {
        Ok(undone(ctx, "data_processing_rollback", "Reverted processed data"))
    }
}

/// Undoes `fraud_detection`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FraudFlagReset;

impl CompensationHandler for FraudFlagReset {
    fn name(&self) -> &str {
        "fraud_flag_reset"
    }

    async fn compensate(&self, ctx: &CompensationContext) -> Result<serde_json::Value, CompensationError> {
        Ok(undone(ctx, "fraud_check_rollback", "Reset fraud detection flags"))
    }
}

/// Undoes `deploy_system`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeploymentRollback;

impl CompensationHandler for DeploymentRollback {
    fn name(&self) -> &str {
        "deployment_rollback"
    }

    async fn compensate(&self, ctx: &CompensationContext) -> Result<serde_json::Value, CompensationError> {
        let previous = ctx
            .metadata
            .get("previous_version")
            .and_then(|v| v.as_str());
        let mut result = undone(
            ctx,
            "deployment_rollback",
            "Rolled back deployment to previous version",
        );
        if let Some(previous) = previous {
            result["restored_version"] = json!(previous);
        }
        Ok(result)
    }
}
