//! Cross-thread dispatch queue.
//!
//! Any thread pushes jobs; only the loop thread pops them. The queue has its
//! own lock, never held together with the loop's state lock, and a condition
//! variable used by the loop's idle wait.

use std::collections::VecDeque;
use std::mem;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::sync::lock;

use super::context::{Context, Program};

/// Work executed on the loop thread with access to the program.
pub(crate) type Job<P> = Box<dyn FnOnce(&mut P, &Context<'_, P>) + Send>;

struct Queue<P: Program> {
    jobs: VecDeque<Job<P>>,
    closed: bool,
    /// Set by `wake`; consumed by the next `wait_for_work`.
    wake: bool,
}

pub(crate) struct Dispatcher<P: Program> {
    queue: Mutex<Queue<P>>,
    ready: Condvar,
}

impl<P: Program> Dispatcher<P> {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(Queue {
                jobs: VecDeque::new(),
                closed: false,
                wake: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Append a job. Fails once the queue is closed.
    pub(crate) fn push(&self, job: Job<P>) -> Result<()> {
        let mut queue = lock(&self.queue);
        if queue.closed {
            return Err(Error::NotRunning);
        }
        queue.jobs.push_back(job);
        drop(queue);
        self.ready.notify_one();
        Ok(())
    }

    pub(crate) fn pop(&self) -> Option<Job<P>> {
        lock(&self.queue).jobs.pop_front()
    }

    pub(crate) fn pending(&self) -> usize {
        lock(&self.queue).jobs.len()
    }

    /// Interrupt an idle wait, now or the next time one starts.
    pub(crate) fn wake(&self) {
        lock(&self.queue).wake = true;
        self.ready.notify_all();
    }

    /// Wait up to `timeout` for work if the queue is empty, then return the
    /// number of queued jobs.
    pub(crate) fn wait_for_work(&self, timeout: Duration) -> usize {
        let mut queue = lock(&self.queue);
        if queue.jobs.is_empty() && !queue.wake && !timeout.is_zero() {
            queue = self
                .ready
                .wait_timeout_while(queue, timeout, |q| q.jobs.is_empty() && !q.wake)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| PoisonError::into_inner(poisoned).0);
        }
        queue.wake = false;
        queue.jobs.len()
    }

    /// Refuse further jobs and drop the pending ones. Returns how many were dropped.
    ///
    /// Dropping a job releases its completion sender, which wakes a blocked
    /// `post_and_wait` caller with `Error::Disconnected`.
    pub(crate) fn close(&self) -> usize {
        let jobs = {
            let mut queue = lock(&self.queue);
            queue.closed = true;
            mem::take(&mut queue.jobs)
        };
        let dropped = jobs.len();
        drop(jobs);
        self.ready.notify_all();
        dropped
    }
}
