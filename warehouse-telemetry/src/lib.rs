//! Telemetry setup shared by warehouse tests.

pub mod tracing;
