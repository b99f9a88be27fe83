//! BoxWorker -- object-safe dynamic dispatch wrapper for `Worker`.
//!
//! 1. `WorkerDyn` is an object-safe mirror of `Worker` with boxed futures
//! 2. Blanket-impl `WorkerDyn` for all `T: Worker`
//! 3. `BoxWorker` wraps `Arc<dyn WorkerDyn>` so pools can hand out clones

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::{Worker, WorkerError};

/// Object-safe version of [`Worker`] with boxed futures.
pub trait WorkerDyn: Send + Sync {
    fn id(&self) -> &str;

    fn run_boxed<'a>(
        &'a self,
        payload: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, WorkerError>> + Send + 'a>>;
}

impl<T: Worker> WorkerDyn for T {
    fn id(&self) -> &str {
        Worker::id(self)
    }

    fn run_boxed<'a>(
        &'a self,
        payload: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, WorkerError>> + Send + 'a>> {
        Box::pin(self.run(payload))
    }
}

/// Type-erased, cheaply clonable worker handle.
#[derive(Clone)]
pub struct BoxWorker {
    inner: Arc<dyn WorkerDyn>,
}

impl BoxWorker {
    pub fn new<T: Worker + 'static>(worker: T) -> Self {
        Self {
            inner: Arc::new(worker),
        }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub async fn run(&self, payload: &str) -> Result<String, WorkerError> {
        self.inner.run_boxed(payload).await
    }

    /// Whether two handles point at the same worker instance.
    pub fn same_worker(&self, other: &BoxWorker) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for BoxWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxWorker").field("id", &self.id()).finish()
    }
}
