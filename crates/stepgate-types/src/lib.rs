//! Shared domain types for Stepgate.
//!
//! Workflows, steps, approval requests/responses, the execution log, the
//! event bus payload and configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod approval;
pub mod config;
pub mod error;
pub mod event;
pub mod workflow;
