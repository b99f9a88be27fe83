//! Worker adapters.

pub mod command;
