//! Observability setup for Cadence binaries.

pub mod tracing_setup;
