//! Compensation handler registry used by the rollback engine.

use std::collections::HashMap;

use super::error::CompensationError;
use super::handler::{ActionType, BoxCompensationHandler, CompensationContext, CompensationHandler};

/// Compensation for action types with no registration: logs and does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericCompensation;

impl CompensationHandler for GenericCompensation {
    fn name(&self) -> &str {
        "generic_rollback"
    }

    async fn compensate(&self, ctx: &CompensationContext) -> Result<serde_json::Value, CompensationError> {
        tracing::info!(
            workflow_id = %ctx.workflow_id,
            step_id = %ctx.step.id,
            action_type = %ctx.step.action_type,
            "generic compensation, nothing to undo"
        );
        Ok(serde_json::json!({ "compensation": "generic_rollback" }))
    }
}

/// Name-indexed registry of compensation handlers with a generic fallback.
pub struct CompensationRegistry {
    handlers: HashMap<ActionType, BoxCompensationHandler>,
    fallback: BoxCompensationHandler,
}

impl CompensationRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: BoxCompensationHandler::new(GenericCompensation),
        }
    }

    /// Register a compensation for an action type, replacing any previous one.
    pub fn register(&mut self, action_type: ActionType, handler: BoxCompensationHandler) {
        self.handlers.insert(action_type, handler);
    }

    pub fn with_handler<T: CompensationHandler + 'static>(
        mut self,
        action_type: ActionType,
        handler: T,
    ) -> Self {
        self.register(action_type, BoxCompensationHandler::new(handler));
        self
    }

    /// The handler for `action_type`, or the generic fallback.
    pub fn resolve(&self, action_type: &ActionType) -> &BoxCompensationHandler {
        self.handlers.get(action_type).unwrap_or(&self.fallback)
    }

    /// Well-known action types without a dedicated compensation.
    pub fn missing_handlers(&self) -> Vec<ActionType> {
        ActionType::well_known()
            .into_iter()
            .filter(|a| !self.handlers.contains_key(a))
            .collect()
    }
}

impl Default for CompensationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl CompensationHandler for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn compensate(&self, _ctx: &CompensationContext) -> Result<serde_json::Value, CompensationError> {
            Ok(serde_json::Value::Null)
        }
    }

    #[test]
    fn resolve_prefers_registered_handler() {
        let registry =
            CompensationRegistry::new().with_handler(ActionType::DeploySystem, Named("deployment_rollback"));
        assert_eq!(
            registry.resolve(&ActionType::DeploySystem).name(),
            "deployment_rollback"
        );
        assert_eq!(
            registry.resolve(&ActionType::Custom("other".to_string())).name(),
            "generic_rollback"
        );
        assert_eq!(registry.missing_handlers().len(), 3);
    }
}
