//! Fixed-size worker pool for fitness evaluation.
//!
//! Workers are pure functions of their input: they share only read-only data
//! and hand back one result per input, gathered in submission order. Signal
//! handling belongs to the coordinator, which flips the [`CancellationToken`];
//! workers only poll it between tasks.

use rayon::prelude::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("evaluation cancelled")]
    Cancelled,

    #[error("worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("failed to build worker pool: {0}")]
    Build(String),
}

/// `floor(cores * fraction)`, at least one.
pub fn worker_count(fraction: f64) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    ((cores as f64 * fraction).floor() as usize).max(1)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    token: CancellationToken,
}

impl WorkerPool {
    pub fn new(threads: usize, token: CancellationToken) -> Result<Self, PoolError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("evotrader-worker-{i}"))
            .build()
            .map_err(|e| PoolError::Build(e.to_string()))?;
        Ok(WorkerPool { pool, token })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Applies `f` to every input on the pool. Results come back in input
    /// order. Cancellation wins over any other failure.
    pub fn map<T, R, F>(&self, inputs: &[T], f: F) -> Result<Vec<R>, PoolError>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        if self.token.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        let token = &self.token;
        let results: Vec<Result<R, PoolError>> = self.pool.install(|| {
            inputs
                .par_iter()
                .map(|input| {
                    if token.is_cancelled() {
                        return Err(PoolError::Cancelled);
                    }
                    panic::catch_unwind(AssertUnwindSafe(|| f(input)))
                        .map_err(|payload| PoolError::WorkerPanicked(panic_message(payload.as_ref())))
                })
                .collect()
        });

        if self.token.is_cancelled() {
            return Err(PoolError::Cancelled);
        }
        results.into_iter().collect()
    }
}
