//! Infrastructure layer for Stepgate.
//!
//! Contains implementations of the ports defined in `stepgate-core`: the
//! SQLite store, configuration loading, notifiers, and the built-in task and
//! compensation handlers.

pub mod config;
pub mod notify;
pub mod sqlite;
pub mod tasks;
