//! Observability setup for Stepgate: tracing subscriber and optional
//! OpenTelemetry export.

pub mod tracing_setup;
