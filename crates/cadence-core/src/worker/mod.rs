//! Worker collaborator: role-bound capabilities that turn a task payload
//! into text.
//!
//! - `Worker` -- the narrow `run(payload) -> text` capability
//! - `box_worker` -- object-safe wrapper for runtime-selected workers
//! - `pool` -- role-keyed acquire/release with lease accounting
//! - `FnWorkerFactory` -- closure-backed factory for dry runs and tests

pub mod box_worker;
pub mod pool;

use std::sync::Arc;

use thiserror::Error;

pub use box_worker::BoxWorker;
pub use pool::{RolePool, WorkerPool};

/// Errors from acquiring or running a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// No worker can be created for this role.
    #[error("no worker available for role '{0}'")]
    Unavailable(String),

    /// The worker ran but reported a failure.
    #[error("worker '{worker}' failed: {message}")]
    Failed { worker: String, message: String },
}

/// A capability bound to a role that performs one task per call.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait Worker: Send + Sync {
    /// Identifier reported in step records (typically the role name).
    fn id(&self) -> &str;

    /// Perform a task and return its textual result.
    fn run(
        &self,
        payload: &str,
    ) -> impl std::future::Future<Output = Result<String, WorkerError>> + Send;
}

/// Creates workers for roles on demand. Called by the pool under its lock.
pub trait WorkerFactory: Send + Sync {
    fn create(&self, role: &str) -> Result<BoxWorker, WorkerError>;
}

// ---------------------------------------------------------------------------
// Closure-backed workers
// ---------------------------------------------------------------------------

type TaskFn = dyn Fn(&str, &str) -> Result<String, String> + Send + Sync;

/// Factory whose workers call a closure with `(role, payload)`.
#[derive(Clone)]
pub struct FnWorkerFactory {
    f: Arc<TaskFn>,
}

impl FnWorkerFactory {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str, &str) -> Result<String, String> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// Workers that return their payload unchanged.
    pub fn echo() -> Self {
        Self::new(|_, payload| Ok(payload.to_string()))
    }
}

impl WorkerFactory for FnWorkerFactory {
    fn create(&self, role: &str) -> Result<BoxWorker, WorkerError> {
        Ok(BoxWorker::new(FnWorker {
            role: role.to_string(),
            f: Arc::clone(&self.f),
        }))
    }
}

struct FnWorker {
    role: String,
    f: Arc<TaskFn>,
}

impl Worker for FnWorker {
    fn id(&self) -> &str {
        &self.role
    }

    async fn run(&self, payload: &str) -> Result<String, WorkerError> {
        (self.f)(&self.role, payload).map_err(|message| WorkerError::Failed {
            worker: self.role.clone(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_factory_returns_payload() {
        let worker = FnWorkerFactory::echo().create("dev").unwrap();
        assert_eq!(worker.id(), "dev");
        assert_eq!(worker.run("build it").await.unwrap(), "build it");
    }

    #[tokio::test]
    async fn test_fn_factory_failure_names_worker() {
        let factory = FnWorkerFactory::new(|role, _| Err(format!("{role} is offline")));
        let err = factory.create("qa").unwrap().run("x").await.unwrap_err();
        assert_eq!(err.to_string(), "worker 'qa' failed: qa is offline");
    }
}
