//! Business logic and repository trait definitions for Stepgate.
//!
//! This crate defines the "ports" (repository and notifier traits) that the
//! infrastructure layer implements. It depends only on `stepgate-types` --
//! never on `stepgate-infra` or any database/IO crate.

pub mod event;
pub mod notify;
pub mod repository;
pub mod service;
pub mod workflow;
