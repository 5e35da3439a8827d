//! The execution loop: one program, one thread, one dispatch queue.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::board::Board;
use crate::clock::{ChangeTracker, RunId};
use crate::config::HostConfig;
use crate::error::{Error, Result};

use super::context::{Context, Program};
use super::dispatch::{Dispatcher, Job};
use super::state::{LoopPhase, LoopState};

/// Runs a [`Program`] cooperatively on a single thread.
///
/// Each iteration raises `serial_event` if the primary port received data,
/// calls `loop_once`, then drains work posted from other threads. Any
/// thread may post work; it always executes on the loop thread, in FIFO
/// order.
///
/// An `ExecutionLoop` runs once. After it stops it rejects new work and must
/// be replaced, which is what [`HostManager`](super::HostManager) does.
pub struct ExecutionLoop<P: Program> {
    board: Arc<Board>,
    run_id: RunId,
    idle_wait: Duration,
    state: LoopState,
    dispatcher: Dispatcher<P>,
    loop_thread: OnceLock<ThreadId>,
}

impl<P: Program> ExecutionLoop<P> {
    pub fn new(board: Arc<Board>, run_id: RunId, config: &HostConfig) -> Self {
        Self {
            board,
            run_id,
            idle_wait: config.idle_wait(),
            state: LoopState::new(),
            dispatcher: Dispatcher::new(),
            loop_thread: OnceLock::new(),
        }
    }

    pub fn board(&self) -> &Arc<Board> {
        &self.board
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn phase(&self) -> LoopPhase {
        self.state.phase()
    }

    /// True until the loop thread has left `run`.
    pub fn is_running(&self) -> bool {
        self.phase().is_running()
    }

    /// True once a stop was requested or the loop is not running.
    pub fn is_cancelled(&self) -> bool {
        self.phase().is_cancelled()
    }

    /// Whether the caller is this loop's thread and the loop has not exited.
    pub fn is_loop_thread(&self) -> bool {
        self.is_running()
            && self
                .loop_thread
                .get()
                .is_some_and(|id| *id == thread::current().id())
    }

    /// Number of posted jobs waiting for the next drain.
    pub fn pending(&self) -> usize {
        self.dispatcher.pending()
    }

    pub fn on_start(&self) {
        if self.state.start() {
            tracing::debug!(run = %self.run_id, "execution loop marked running");
        }
    }

    /// Request cancellation and wake an idle loop thread.
    pub fn on_stop(&self) {
        if self.state.cancel() {
            tracing::debug!(run = %self.run_id, "stop requested");
        }
        self.dispatcher.wake();
    }

    /// Undo `on_start` when the loop thread could not be spawned.
    pub(crate) fn abort_start(&self) {
        self.state.finish();
        self.dispatcher.close();
    }

    /// Execute `f` on the loop thread without waiting for it.
    ///
    /// On the loop thread itself `f` runs immediately.
    pub fn post<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_loop_thread() {
            f();
            return Ok(());
        }
        self.push(Box::new(move |_: &mut P, _: &Context<'_, P>| f()))
    }

    /// Execute `f` on the loop thread and return its result.
    ///
    /// On the loop thread itself `f` runs immediately. Otherwise the caller
    /// blocks until `f` has finished, or gets `Error::Disconnected` if the loop
    /// stopped before reaching it.
    pub fn post_and_wait<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_loop_thread() {
            return Ok(f());
        }
        let (done, wait) = mpsc::sync_channel(1);
        self.push(Box::new(move |_: &mut P, _: &Context<'_, P>| {
            let _ = done.send(f());
        }))?;
        wait.recv().map_err(|_| Error::Disconnected)
    }

    /// Queue `f` to run against the program at the next drain point.
    ///
    /// Always queued, also when called from the loop thread.
    pub fn post_to_program<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut P, &Context<'_, P>) + Send + 'static,
    {
        self.push(Box::new(f))
    }

    /// Run `f` against the program on the loop thread and return its result.
    ///
    /// Fails with `Error::Reentrant` on the loop thread, where the program is
    /// already borrowed by the running callback.
    pub fn call_program<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut P, &Context<'_, P>) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_loop_thread() {
            return Err(Error::Reentrant);
        }
        let (done, wait) = mpsc::sync_channel(1);
        self.push(Box::new(move |program: &mut P, ctx: &Context<'_, P>| {
            let _ = done.send(f(program, ctx));
        }))?;
        wait.recv().map_err(|_| Error::Disconnected)
    }

    /// Run the program to completion on the calling thread.
    ///
    /// Performs the device reset, `setup`, the loop and `teardown`. Errors
    /// and panics from the program end the run and are reported on the
    /// primary serial port. The program is dropped on this thread before the
    /// loop reports `Stopped`.
    pub fn run(self: &Arc<Self>, program: P) {
        let span = tracing::info_span!("run", id = %self.run_id);
        let _entered = span.enter();

        if self.loop_thread.set(thread::current().id()).is_err() {
            tracing::warn!("execution loop already ran; discarding program");
            return;
        }
        let _finish = FinishOnExit(&**self);
        tracing::info!("program started");

        let ctx = Context::new(self);
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || {
            let mut program = program;
            self.drive(&mut program, &ctx)
        }));

        let fault = match outcome {
            Ok(Ok(())) => {
                tracing::info!("program stopped");
                return;
            }
            Ok(Err(err)) => {
                tracing::error!("program failed: {:#}", err);
                format!("!fault: {:#}", err)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("program panicked: {}", message);
                format!("!fault: panic: {}", message)
            }
        };
        match self.board.serial_port(0) {
            Some(port) => port.println(fault),
            None => tracing::warn!("board has no serial port; fault not reported"),
        }
    }

    fn drive(self: &Arc<Self>, program: &mut P, ctx: &Context<'_, P>) -> anyhow::Result<()> {
        self.board.reset();

        let serial = self.board.serial();
        let mut rx_seen = ChangeTracker::synced(serial.rx_id());

        program.setup(ctx)?;

        while !self.is_cancelled() {
            if serial.is_ready() && rx_seen.observe(serial.rx_id()) {
                program.serial_event(ctx)?;
            }
            program.loop_once(ctx)?;
            self.drain(program, ctx);
        }

        program.teardown(ctx)
    }

    /// Execute the jobs queued when the drain starts, stopping early once
    /// cancellation is observed.
    fn drain(&self, program: &mut P, ctx: &Context<'_, P>) {
        let budget = self.dispatcher.wait_for_work(self.idle_wait);
        for _ in 0..budget {
            let Some(job) = self.dispatcher.pop() else {
                break;
            };
            job(program, ctx);
            if self.is_cancelled() {
                break;
            }
        }
    }

    fn push(&self, job: Job<P>) -> Result<()> {
        self.dispatcher.push(job).inspect_err(|_| {
            tracing::debug!(run = %self.run_id, "work posted to a stopped loop");
        })
    }
}

/// Marks the loop stopped and closes its queue when `run` returns or unwinds.
struct FinishOnExit<'a, P: Program>(&'a ExecutionLoop<P>);

impl<P: Program> Drop for FinishOnExit<'_, P> {
    fn drop(&mut self) {
        self.0.state.finish();
        let dropped = self.0.dispatcher.close();
        if dropped > 0 {
            tracing::debug!(dropped, "discarded work posted after stop");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
