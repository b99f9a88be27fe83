//! Workflow definitions and the execution engine.
//!
//! - `definition` -- parse, normalize and validate YAML/JSON definitions
//! - `condition` -- conditional-step evaluation against the context
//! - `context` -- input bindings and template rendering
//! - `registry` -- live executions shared with the monitor
//! - `step_runner` -- per-run step dispatch
//! - `checkpoint` -- snapshot persistence around the step loop
//! - `executor` -- `WorkflowEngine`

pub mod checkpoint;
pub mod condition;
pub mod context;
pub mod definition;
pub mod executor;
pub mod registry;
pub mod step_runner;

pub use executor::{EngineError, WorkflowEngine};
pub use registry::ExecutionRegistry;
