//! Built-in task handlers for the well-known action types.

use chrono::Utc;
use serde_json::{Map, Value, json};
use stepgate_core::workflow::error::ExecutionError;
use stepgate_core::workflow::handler::{TaskContext, TaskHandler, TaskOutcome};
use uuid::Uuid;

/// Score above which fraud detection recommends manual review.
pub const MANUAL_REVIEW_THRESHOLD: u32 = 70;

/// `original_data` from the task metadata as an object. Absent means empty.
fn original_data(ctx: &TaskContext) -> Result<Map<String, Value>, ExecutionError> {
    match ctx.metadata.get("original_data") {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(ExecutionError::InvalidInput(format!(
            "original_data must be an object, got {other}"
        ))),
    }
}

fn short_id(prefix: &str) -> String {
    let id = Uuid::now_v7().simple().to_string();
    format!("{prefix}_{}", &id[id.len() - 8..])
}

// ---------------------------------------------------------------------------
// validate_data
// ---------------------------------------------------------------------------

/// Fails when any `original_data` field is null or an empty string.
#[derive(Debug, Default, Clone, Copy)]
pub struct ValidateData;

impl TaskHandler for ValidateData {
    fn name(&self) -> &str {
        "validate_data"
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutcome, ExecutionError> {
        let data = original_data(ctx)?;

        let mut fields: Vec<&String> = data.keys().collect();
        fields.sort();
        let issues: Vec<String> = fields
            .iter()
            .filter(|k| matches!(&data[k.as_str()], Value::Null) || data[k.as_str()] == "")
            .map(|k| format!("Missing value for {k}"))
            .collect();

        let valid = issues.is_empty();
        if !valid {
            tracing::debug!(workflow_id = %ctx.workflow_id, issues = issues.len(), "validation failed");
        }

        let result = json!({
            "valid": valid,
            "issues": issues,
            "validated_fields": fields,
            "processed_at": Utc::now().to_rfc3339(),
        });
        Ok(if valid {
            TaskOutcome::ok(result)
        } else {
            TaskOutcome::failed(result)
        })
    }
}

// ---------------------------------------------------------------------------
// process_data
// ---------------------------------------------------------------------------

/// Stamps `original_data` as processed.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessData;

impl TaskHandler for ProcessData {
    fn name(&self) -> &str {
        "process_data"
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutcome, ExecutionError> {
        let mut data = original_data(ctx)?;
        data.insert("processed_at".to_string(), json!(Utc::now().to_rfc3339()));
        data.insert("processing_id".to_string(), json!(short_id("proc")));
        data.insert("status".to_string(), json!("processed"));
        Ok(TaskOutcome::ok(Value::Object(data)))
    }
}

// ---------------------------------------------------------------------------
// fraud_detection
// ---------------------------------------------------------------------------

/// Deterministic risk scoring from the `amount` metadata field.
///
/// The score is `amount / 100` clamped to `1..=100`; scores strictly above
/// the threshold need manual review. A step may override the threshold with
/// a `threshold` metadata field.
#[derive(Debug, Clone, Copy)]
pub struct FraudDetection {
    pub threshold: u32,
}

impl Default for FraudDetection {
    fn default() -> Self {
        Self {
            threshold: MANUAL_REVIEW_THRESHOLD,
        }
    }
}

pub fn risk_score(amount: f64) -> u32 {
    if !amount.is_finite() || amount <= 0.0 {
        return 1;
    }
    ((amount / 100.0) as u32).clamp(1, 100)
}

impl TaskHandler for FraudDetection {
    fn name(&self) -> &str {
        "fraud_detection"
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutcome, ExecutionError> {
        let amount = match ctx.metadata.get("amount") {
            None => 0.0,
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| {
                ExecutionError::InvalidInput(format!("amount is not a number: '{s}'"))
            })?,
            Some(other) => {
                return Err(ExecutionError::InvalidInput(format!(
                    "amount is not a number: {other}"
                )));
            }
        };
        let threshold = match ctx.metadata.get("threshold") {
            None => self.threshold,
            Some(v) => v
                .as_u64()
                .and_then(|t| u32::try_from(t).ok())
                .ok_or_else(|| {
                    ExecutionError::InvalidInput(format!("threshold is not a valid score: {v}"))
                })?,
        };

        let score = risk_score(amount);
        let high_risk = score > threshold;

        Ok(TaskOutcome::ok(json!({
            "risk_score": score,
            "risk_level": if high_risk { "high" } else { "low" },
            "recommendation": if high_risk { "manual_review" } else { "auto_approve" },
            "requires_manual_review": high_risk,
            "analyzed_at": Utc::now().to_rfc3339(),
        })))
    }
}

// ---------------------------------------------------------------------------
// deploy_system
// ---------------------------------------------------------------------------

/// Records a deployment of `version` to `environment`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeploySystem;

impl TaskHandler for DeploySystem {
    fn name(&self) -> &str {
        "deploy_system"
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutcome, ExecutionError> {
        let field = |key: &str, default: &str| {
            ctx.metadata
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };
        let environment = field("environment", "production");
        let version = field("version", "1.0.0");

        tracing::info!(
            workflow_id = %ctx.workflow_id,
            step_id = %ctx.step_id,
            %environment,
            %version,
            "deploying"
        );

        Ok(TaskOutcome::ok(json!({
            "deployment_id": short_id("deploy"),
            "environment": environment,
            "version": version,
            "status": "success",
            "deployed_at": Utc::now().to_rfc3339(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use stepgate_core::workflow::handler::ActionType;
    use stepgate_types::workflow::WorkflowId;

    fn ctx(action: &str, metadata: Value) -> TaskContext {
        let metadata: HashMap<String, Value> = match metadata {
            Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        TaskContext {
            workflow_id: WorkflowId::new(),
            step_id: "s1".to_string(),
            action_type: ActionType::from(action),
            metadata,
        }
    }

    #[tokio::test]
    async fn validate_flags_empty_fields() {
        let ok = ValidateData
            .execute(&ctx("validate_data", json!({ "original_data": { "name": "acme", "amount": 10 } })))
            .await
            .unwrap();
        assert!(ok.success);
        assert_eq!(ok.result["validated_fields"], json!(["amount", "name"]));

        let bad = ValidateData
            .execute(&ctx(
                "validate_data",
                json!({ "original_data": { "name": "", "email": null, "amount": 0 } }),
            ))
            .await
            .unwrap();
        assert!(!bad.success);
        assert_eq!(
            bad.result["issues"],
            json!(["Missing value for email", "Missing value for name"])
        );
    }

    #[tokio::test]
    async fn validate_without_data_passes() {
        let outcome = ValidateData.execute(&ctx("validate_data", json!({}))).await.unwrap();
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn non_object_data_is_invalid_input() {
        let err = ProcessData
            .execute(&ctx("process_data", json!({ "original_data": [1, 2] })))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn process_keeps_original_fields() {
        let outcome = ProcessData
            .execute(&ctx("process_data", json!({ "original_data": { "sku": "A-1" } })))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.result["sku"], "A-1");
        assert_eq!(outcome.result["status"], "processed");
        assert!(outcome.result["processing_id"].as_str().unwrap().starts_with("proc_"));
    }

    #[test]
    fn risk_score_is_clamped() {
        assert_eq!(risk_score(0.0), 1);
        assert_eq!(risk_score(-5.0), 1);
        assert_eq!(risk_score(f64::NAN), 1);
        assert_eq!(risk_score(7_000.0), 70);
        assert_eq!(risk_score(7_100.0), 71);
        assert_eq!(risk_score(1e9), 100);
    }

    #[tokio::test]
    async fn fraud_detection_flags_large_amounts() {
        let low = FraudDetection::default()
            .execute(&ctx("fraud_detection", json!({ "amount": 7000 })))
            .await
            .unwrap();
        assert_eq!(low.result["recommendation"], "auto_approve");

        let high = FraudDetection::default()
            .execute(&ctx("fraud_detection", json!({ "amount": "7100" })))
            .await
            .unwrap();
        assert!(high.success);
        assert_eq!(high.result["risk_score"], 71);
        assert_eq!(high.result["requires_manual_review"], true);

        let strict = FraudDetection::default()
            .execute(&ctx("fraud_detection", json!({ "amount": 2000, "threshold": 10 })))
            .await
            .unwrap();
        assert_eq!(strict.result["risk_level"], "high");
    }

    #[tokio::test]
    async fn fraud_detection_threshold_is_exclusive_and_range_checked() {
        let at_threshold = FraudDetection::default()
            .execute(&ctx("fraud_detection", json!({ "amount": 7000 })))
            .await
            .unwrap();
        assert_eq!(at_threshold.result["risk_score"], 70);
        assert_eq!(at_threshold.result["requires_manual_review"], false);

        let err = FraudDetection::default()
            .execute(&ctx("fraud_detection", json!({ "amount": 9000, "threshold": 4294967366u64 })))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidInput(_)));

        let err = FraudDetection::default()
            .execute(&ctx("fraud_detection", json!({ "amount": 9000, "threshold": -1 })))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("threshold"));
    }

    #[tokio::test]
    async fn fraud_detection_rejects_bad_amount() {
        let err = FraudDetection::default()
            .execute(&ctx("fraud_detection", json!({ "amount": "lots" })))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("lots"));
    }

    #[tokio::test]
    async fn deploy_uses_metadata_defaults() {
        let outcome = DeploySystem
            .execute(&ctx("deploy_system", json!({ "version": "2.3.1" })))
            .await
            .unwrap();
        assert_eq!(outcome.result["environment"], "production");
        assert_eq!(outcome.result["version"], "2.3.1");
    }
}
