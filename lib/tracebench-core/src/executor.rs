//! Bounded, fire-and-forget execution of collection runs.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt as _;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, error};

use crate::{
    pipeline::{panic_message, CollectionPipeline, RunReport},
    test_case::TestCaseContext,
};

/// Default number of runs that may execute at the same time.
pub const DEFAULT_CAPACITY: usize = 10;

/// Result of draining the executor.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Reports of the runs that completed, in completion order.
    pub reports: Vec<RunReport>,

    /// Number of runs that panicked outside of a stage.
    pub crashed: usize,
}

struct WorkerPool {
    permits: Arc<Semaphore>,
    tasks: JoinSet<Option<RunReport>>,
}

impl WorkerPool {
    fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            tasks: JoinSet::new(),
        }
    }
}

/// Runs one [`CollectionPipeline`] invocation per submitted test case on a bounded pool.
///
/// Submission never waits: runs beyond the pool's capacity are queued until a slot frees up. [`drain`][Self::drain] is
/// the only point where the caller waits for collection to catch up, which lets the next test case's load phase overlap
/// with the collection of the previous ones.
///
/// The pool is created lazily on the first submission and discarded by `drain`, so a run that panicked in one batch has
/// no effect on the next.
pub struct AsyncExecutor {
    pipeline: Arc<CollectionPipeline>,
    capacity: usize,
    pool: Option<WorkerPool>,
}

impl AsyncExecutor {
    /// Creates a new `AsyncExecutor` with the given capacity.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(pipeline: Arc<CollectionPipeline>, capacity: usize) -> Self {
        Self {
            pipeline,
            capacity: capacity.max(1),
            pool: None,
        }
    }

    /// Returns the maximum number of concurrent runs.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of runs submitted since the last drain that have not been collected yet.
    pub fn pending(&self) -> usize {
        self.pool.as_ref().map_or(0, |pool| pool.tasks.len())
    }

    /// Submits a run for the given test case and returns immediately.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn submit(&mut self, test_case: TestCaseContext) {
        let capacity = self.capacity;
        let pool = self.pool.get_or_insert_with(|| WorkerPool::new(capacity));

        let permits = Arc::clone(&pool.permits);
        let pipeline = Arc::clone(&self.pipeline);
        debug!(test_case = test_case.name(), "Submitting collection run.");

        pool.tasks.spawn(async move {
            // The pool never closes its semaphore.
            let _permit = permits.acquire_owned().await.ok();
            let name = test_case.name().to_string();
            match AssertUnwindSafe(pipeline.run(test_case)).catch_unwind().await {
                Ok(report) => Some(report),
                Err(panic) => {
                    error!(test_case = %name, panic = panic_message(&*panic), "Collection run crashed.");
                    None
                }
            }
        });
    }

    /// Waits for every submitted run to finish and returns their reports.
    ///
    /// The current pool is discarded; the next submission creates a fresh one.
    pub async fn drain(&mut self) -> DrainReport {
        let mut drained = DrainReport::default();
        let Some(mut pool) = self.pool.take() else {
            return drained;
        };

        while let Some(result) = pool.tasks.join_next().await {
            match result {
                Ok(Some(report)) => drained.reports.push(report),
                Ok(None) => drained.crashed += 1,
                Err(e) => {
                    error!(error = %e, "Collection run crashed.");
                    drained.crashed += 1;
                }
            }
        }

        debug!(
            completed = drained.reports.len(),
            crashed = drained.crashed,
            "Drained collection runs."
        );
        drained
    }
}
