//! Role-keyed worker pool.
//!
//! The pool is the one piece of shared mutable state the engine touches from
//! several executions at once. Every acquire/release pair goes through a
//! single mutex around the allocation table, so two executions asking for
//! the same role never race on creation or lease accounting.

use std::collections::HashMap;

use tokio::sync::Mutex;

use super::{BoxWorker, WorkerError, WorkerFactory};

/// Hands out reusable worker handles by role.
pub trait WorkerPool: Send + Sync {
    /// Acquire the worker bound to `role`, creating it on first use.
    fn acquire(
        &self,
        role: &str,
    ) -> impl std::future::Future<Output = Result<BoxWorker, WorkerError>> + Send;

    /// Return one lease on `role`. Releasing an unknown role is a no-op.
    fn release(&self, role: &str) -> impl std::future::Future<Output = ()> + Send;

    /// Snapshot of outstanding leases per role.
    fn leases(&self) -> impl std::future::Future<Output = HashMap<String, usize>> + Send;
}

struct Allocation {
    worker: BoxWorker,
    leases: usize,
}

/// Pool that keeps one worker per role and counts outstanding leases.
///
/// Workers stay cached after their last release and are reused by the next
/// acquire of the same role.
pub struct RolePool<F: WorkerFactory> {
    factory: F,
    table: Mutex<HashMap<String, Allocation>>,
}

impl<F: WorkerFactory> RolePool<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            table: Mutex::new(HashMap::new()),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }
}

impl<F: WorkerFactory> WorkerPool for RolePool<F> {
    async fn acquire(&self, role: &str) -> Result<BoxWorker, WorkerError> {
        let mut table = self.table.lock().await;
        if let Some(alloc) = table.get_mut(role) {
            alloc.leases += 1;
            tracing::debug!(role, leases = alloc.leases, "reusing pooled worker");
            return Ok(alloc.worker.clone());
        }

        let worker = self.factory.create(role)?;
        table.insert(
            role.to_string(),
            Allocation {
                worker: worker.clone(),
                leases: 1,
            },
        );
        tracing::debug!(role, worker = worker.id(), "created worker");
        Ok(worker)
    }

    async fn release(&self, role: &str) {
        let mut table = self.table.lock().await;
        match table.get_mut(role) {
            Some(alloc) if alloc.leases > 0 => {
                alloc.leases -= 1;
                tracing::debug!(role, leases = alloc.leases, "released worker");
            }
            _ => tracing::debug!(role, "release for role without outstanding lease"),
        }
    }

    async fn leases(&self) -> HashMap<String, usize> {
        self.table
            .lock()
            .await
            .iter()
            .map(|(role, alloc)| (role.clone(), alloc.leases))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::worker::FnWorkerFactory;

    struct CountingFactory {
        created: Arc<AtomicUsize>,
        inner: FnWorkerFactory,
    }

    impl WorkerFactory for CountingFactory {
        fn create(&self, role: &str) -> Result<BoxWorker, WorkerError> {
            if role == "ghost" {
                return Err(WorkerError::Unavailable(role.to_string()));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            self.inner.create(role)
        }
    }

    fn pool() -> (RolePool<CountingFactory>, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let pool = RolePool::new(CountingFactory {
            created: Arc::clone(&created),
            inner: FnWorkerFactory::echo(),
        });
        (pool, created)
    }

    #[tokio::test]
    async fn test_acquire_reuses_worker_and_counts_leases() {
        let (pool, created) = pool();
        let a = pool.acquire("dev").await.unwrap();
        let b = pool.acquire("dev").await.unwrap();
        assert!(a.same_worker(&b));
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(pool.leases().await["dev"], 2);

        pool.release("dev").await;
        pool.release("dev").await;
        pool.release("dev").await;
        assert_eq!(pool.leases().await["dev"], 0);

        let c = pool.acquire("dev").await.unwrap();
        assert!(a.same_worker(&c));
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_role_fails_without_entry() {
        let (pool, _) = pool();
        let err = pool.acquire("ghost").await.unwrap_err();
        assert!(matches!(err, WorkerError::Unavailable(_)));
        assert!(pool.leases().await.is_empty());
        pool.release("ghost").await;
    }

    #[tokio::test]
    async fn test_concurrent_acquires_create_once() {
        let (pool, created) = pool();
        let pool = Arc::new(pool);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                pool.acquire("qa").await.map(|_| ())
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(pool.leases().await["qa"], 16);
    }
}
