//! Infrastructure layer for Cadence.
//!
//! Contains implementations of the collaborator traits defined in
//! `cadence-core`: SQLite snapshot storage, the filesystem document store,
//! shell-command workers, and the global config loader.

pub mod config;
pub mod sqlite;
pub mod storage;
pub mod worker;
