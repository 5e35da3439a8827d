//! Dedicated OS thread that hosts one execution loop at a time.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};

use super::context::Program;
use super::execution_loop::ExecutionLoop;

/// Owns the thread an [`ExecutionLoop`] runs on.
///
/// `start` spawns the thread and returns once the loop is marked running.
/// `stop` requests cancellation through the loop's own queue, so it is
/// observed in order with the work posted before it, then joins.
#[derive(Debug)]
pub struct WorkerThread {
    handle: Option<JoinHandle<()>>,
    thread_name: String,
}

impl WorkerThread {
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            handle: None,
            thread_name: thread_name.into(),
        }
    }

    /// Whether a thread was started and not yet joined.
    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawn the worker thread and run `program` on `looper`.
    pub fn start<P: Program>(&mut self, looper: &Arc<ExecutionLoop<P>>, program: P) -> Result<()> {
        if self.is_active() {
            return Err(Error::AlreadyStarted);
        }

        looper.on_start();
        let runner = Arc::clone(looper);
        let handle = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || runner.run(program))
            .map_err(|e| {
                looper.abort_start();
                Error::Spawn(e)
            })?;

        tracing::debug!(run = %looper.run_id(), thread = %self.thread_name, "worker thread spawned");
        self.handle = Some(handle);
        Ok(())
    }

    /// Stop the loop and join the thread. No-op if nothing was started.
    ///
    /// Called from the worker thread itself this only requests cancellation;
    /// the thread exits after the current iteration and is joined by the
    /// next `stop` from another thread.
    pub fn stop<P: Program>(&mut self, looper: &Arc<ExecutionLoop<P>>) {
        let Some(handle) = self.handle.as_ref() else {
            return;
        };

        if handle.thread().id() == thread::current().id() {
            tracing::warn!(run = %looper.run_id(), "stop called from the worker thread; cancelling without join");
            looper.on_stop();
            return;
        }

        let target = Arc::clone(looper);
        if let Err(e) = looper.post_and_wait(move || target.on_stop()) {
            // The loop already exited; joining is all that is left.
            tracing::debug!(run = %looper.run_id(), "stop request not delivered: {}", e);
        }
        looper.on_stop();

        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!(run = %looper.run_id(), "worker thread panicked outside the program");
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            tracing::warn!(thread = %self.thread_name, "worker thread dropped while active; detaching");
        }
    }
}
