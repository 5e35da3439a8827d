//! Lifecycle state of an execution loop.

use std::sync::Mutex;

use crate::sync::lock;

/// Phase of an execution loop.
///
/// Moves forward only: `NotStarted → Running → CancelRequested → Stopped`.
/// A faulted run goes straight from `Running` to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopPhase {
    #[default]
    NotStarted,
    Running,
    CancelRequested,
    Stopped,
}

impl LoopPhase {
    /// The loop thread has not exited yet.
    pub fn is_running(self) -> bool {
        matches!(self, LoopPhase::Running | LoopPhase::CancelRequested)
    }

    /// Cancellation was requested or the loop is not running.
    pub fn is_cancelled(self) -> bool {
        self != LoopPhase::Running
    }
}

/// Mutex-guarded [`LoopPhase`].
#[derive(Debug, Default)]
pub(crate) struct LoopState {
    phase: Mutex<LoopPhase>,
}

impl LoopState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn phase(&self) -> LoopPhase {
        *lock(&self.phase)
    }

    /// `NotStarted → Running`. Returns whether the phase changed.
    pub(crate) fn start(&self) -> bool {
        self.transition(LoopPhase::NotStarted, LoopPhase::Running)
    }

    /// `Running → CancelRequested`. Returns whether the phase changed.
    pub(crate) fn cancel(&self) -> bool {
        self.transition(LoopPhase::Running, LoopPhase::CancelRequested)
    }

    /// Any phase → `Stopped`.
    pub(crate) fn finish(&self) {
        *lock(&self.phase) = LoopPhase::Stopped;
    }

    fn transition(&self, from: LoopPhase, to: LoopPhase) -> bool {
        let mut phase = lock(&self.phase);
        if *phase == from {
            *phase = to;
            true
        } else {
            false
        }
    }
}
