//! The program trait and the context handed to its callbacks.

use std::sync::Arc;
use std::thread;

use crate::board::Board;
use crate::clock::RunId;
use crate::error::Result;
use crate::serial::SerialPort;

use super::execution_loop::ExecutionLoop;

/// An embedded program driven by an [`ExecutionLoop`].
///
/// Callbacks run on the loop thread, one at a time, without any core lock
/// held. Returning an error or panicking ends the run: the loop writes a
/// `!fault:` line to the primary serial port and stops.
pub trait Program: Send + Sized + 'static {
    /// Called once after the device reset.
    fn setup(&mut self, _ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once per loop iteration.
    fn loop_once(&mut self, _ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        thread::yield_now();
        Ok(())
    }

    /// Called before `loop_once` when new bytes arrived on the primary port
    /// and the port is open.
    fn serial_event(&mut self, _ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once after the loop was cancelled. Skipped after a fault.
    fn teardown(&mut self, _ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// View of the running loop available to program callbacks and to work
/// posted with [`ExecutionLoop::post_to_program`].
pub struct Context<'a, P: Program> {
    looper: &'a Arc<ExecutionLoop<P>>,
}

impl<'a, P: Program> Context<'a, P> {
    pub(crate) fn new(looper: &'a Arc<ExecutionLoop<P>>) -> Self {
        Self { looper }
    }

    pub fn board(&self) -> &Board {
        self.looper.board()
    }

    /// The primary serial port.
    pub fn serial(&self) -> &SerialPort {
        self.looper.board().serial()
    }

    pub fn run_id(&self) -> RunId {
        self.looper.run_id()
    }

    pub fn is_cancelled(&self) -> bool {
        self.looper.is_cancelled()
    }

    /// Ask the loop to stop after the current iteration.
    pub fn request_stop(&self) {
        self.looper.on_stop();
    }

    /// Shared handle to the loop, for helper threads that post back to it.
    pub fn handle(&self) -> Arc<ExecutionLoop<P>> {
        Arc::clone(self.looper)
    }

    /// See [`ExecutionLoop::post`]. From a callback `f` runs immediately.
    pub fn post<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.looper.post(f)
    }

    /// Queue `f` to run against the program at the end of this iteration.
    pub fn defer<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut P, &Context<'_, P>) + Send + 'static,
    {
        self.looper.post_to_program(f)
    }
}
