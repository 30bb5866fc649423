//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (stepgate-infra) implements. The core crate never depends on any
//! specific storage technology.

pub mod approval;
pub mod memory;
pub mod workflow;

pub use approval::ApprovalRepository;
pub use workflow::WorkflowRepository;

/// The full store contract required by the engine.
///
/// Blanket-implemented for anything that provides both repositories.
pub trait Store: WorkflowRepository + ApprovalRepository + 'static {}

impl<T: WorkflowRepository + ApprovalRepository + 'static> Store for T {}
