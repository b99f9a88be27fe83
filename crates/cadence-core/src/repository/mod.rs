//! Repository trait definitions (ports) implemented by cadence-infra.

pub mod execution;
