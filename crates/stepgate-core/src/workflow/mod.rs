//! Workflow engine core: sequential execution, approval gating, retries and
//! compensation.
//!
//! - `engine` -- step loop, active-run registry, failure path
//! - `approval` -- approval requests, decision slots, timeout sweep
//! - `rollback` -- LIFO compensation sweep and snapshots
//! - `executor` / `compensation` -- handler registries with generic fallbacks
//! - `handler` -- task and compensation handler traits
//! - `retry` -- fixed-delay retry policy
//! - `error` -- engine error taxonomy

pub mod approval;
pub mod compensation;
pub mod engine;
pub mod error;
pub mod executor;
pub mod handler;
pub mod retry;
pub mod rollback;

#[cfg(test)]
pub(crate) mod testing;
