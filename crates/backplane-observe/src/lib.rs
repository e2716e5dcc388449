//! Observability for the Backplane client: tracing subscriber setup with
//! optional OpenTelemetry export.

pub mod tracing_setup;
