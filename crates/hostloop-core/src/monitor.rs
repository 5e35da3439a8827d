//! Streaming reader for serial TX output.
//!
//! The monitor never holds the port lock while waiting: it checks the TX id
//! every poll period and only copies lines when the id moved.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::board::Board;
use crate::clock::ChangeTracker;
use crate::error::{Error, Result};
use crate::serial::{LineBatch, SerialPort};

/// Default interval between two TX polls.
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_millis(50);

/// Cursor over the completed lines of one port.
#[derive(Debug, Default)]
pub struct LinePoller {
    tracker: ChangeTracker,
    cursor: u64,
}

impl LinePoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines completed since the previous poll, or `None` if the port's TX
    /// id did not change or nothing new was completed.
    pub fn poll(&mut self, port: &SerialPort) -> Option<LineBatch> {
        if !self.tracker.observe(port.tx_id()) {
            return None;
        }
        let batch = port.lines_after(self.cursor);
        self.cursor = batch.next;
        (!batch.lines.is_empty() || batch.dropped > 0).then_some(batch)
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }
}

/// Background thread forwarding new TX lines of a port to a sink.
#[derive(Debug)]
pub struct TxMonitor {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TxMonitor {
    /// Start polling `board`'s port `port` every `period`.
    ///
    /// The sink runs on the monitor thread.
    pub fn spawn<F>(board: Arc<Board>, port: usize, period: Duration, mut sink: F) -> Result<Self>
    where
        F: FnMut(&LineBatch) + Send + 'static,
    {
        if board.serial_port(port).is_none() {
            return Err(Error::Config(format!("no serial port {}", port)));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(format!("hostloop-tx{}", port))
            .spawn(move || {
                let mut poller = LinePoller::new();
                loop {
                    // Read before polling so the last pass sees everything
                    // printed before `stop`.
                    let stopping = flag.load(Ordering::Acquire);
                    if let Some(serial) = board.serial_port(port)
                        && let Some(batch) = poller.poll(serial)
                    {
                        sink(&batch);
                    }
                    if stopping {
                        break;
                    }
                    thread::park_timeout(period);
                }
            })
            .map_err(Error::Spawn)?;

        tracing::debug!(port, period_ms = period.as_millis() as u64, "tx monitor started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the thread after one last poll.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        handle.thread().unpark();
        if handle.join().is_err() {
            tracing::warn!("tx monitor sink panicked");
        }
    }
}

impl Drop for TxMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
