//! Shared domain types for Cadence.
//!
//! This crate contains the data model used across the workflow engine: the
//! declarative definition tree, execution records, alerts and metric points,
//! and the configuration and error types shared by core and infra.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod monitor;
pub mod workflow;
