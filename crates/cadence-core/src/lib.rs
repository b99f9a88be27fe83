//! Workflow engine and monitor for Cadence.
//!
//! This crate defines the collaborator "ports" (worker pool, document store,
//! execution store) that the infrastructure layer implements. It depends only
//! on `cadence-types` -- never on `cadence-infra` or any database/IO crate.

pub mod event;
pub mod monitor;
pub mod repository;
pub mod storage;
pub mod worker;
pub mod workflow;
