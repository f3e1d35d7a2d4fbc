//! Fixed-size worker pool shared by a service and all of its sessions.

use crate::error::{NetError, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A multi-threaded runtime with a fixed number of workers.
///
/// Every socket completion, timer and posted task of one service runs here;
/// any worker may run any of them.
pub struct WorkerPool {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    workers: usize,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Builds a pool with `workers` threads (at least one).
    pub fn new(workers: usize, shutdown_timeout: Duration) -> Result<Self> {
        let workers = workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("game-net-worker")
            .enable_all()
            .build()
            .map_err(|e| NetError::Runtime(format!("failed to build worker pool: {e}")))?;
        let handle = runtime.handle().clone();

        debug!("Worker pool started with {} thread(s)", workers);
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
            workers,
            shutdown_timeout,
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Runs `future` to completion on the pool, blocking the calling thread.
    ///
    /// Must not be called from one of the pool's own workers.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }

    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// Stops every worker. Pending tasks are dropped; calling again is a no-op.
    pub fn shutdown(&self) {
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };
        if Handle::try_current().is_ok() {
            // Inside some runtime's context a blocking wait would panic.
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(self.shutdown_timeout);
        }
        info!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("running", &self.is_running())
            .finish()
    }
}
