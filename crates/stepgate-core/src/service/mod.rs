//! Business logic services (use cases).
//!
//! Services orchestrate the engine components and repository calls. They
//! depend on traits (ports), never on concrete infrastructure.

pub mod workflow;

pub use workflow::{RollbackTrigger, WorkflowService};
