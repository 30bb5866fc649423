//! Built-in task and compensation handlers.
//!
//! Covers the four well-known action types. Anything else falls through to
//! the generic handlers in `stepgate-core`.

pub mod compensation;
pub mod handlers;

use stepgate_core::workflow::compensation::CompensationRegistry;
use stepgate_core::workflow::executor::TaskExecutor;
use stepgate_core::workflow::handler::ActionType;

pub use compensation::{DataRevert, DeploymentRollback, FraudFlagReset, ValidationReset};
pub use handlers::{DeploySystem, FraudDetection, ProcessData, ValidateData};

/// Executor with every built-in task handler registered.
pub fn builtin_executor() -> TaskExecutor {
    TaskExecutor::new()
        .with_handler(ActionType::ValidateData, ValidateData)
        .with_handler(ActionType::ProcessData, ProcessData)
        .with_handler(ActionType::FraudDetection, FraudDetection::default())
        .with_handler(ActionType::DeploySystem, DeploySystem)
}

/// Registry with every built-in compensation registered.
pub fn builtin_compensations() -> CompensationRegistry {
    CompensationRegistry::new()
        .with_handler(ActionType::ValidateData, ValidationReset)
        .with_handler(ActionType::ProcessData, DataRevert)
        .with_handler(ActionType::FraudDetection, FraudFlagReset)
        .with_handler(ActionType::DeploySystem, DeploymentRollback)
}
