//! Storage trait definitions for workflow documents.

pub mod document;
