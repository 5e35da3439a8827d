//! Emulated serial port.
//!
//! A [`SerialPort`] carries two independent directions:
//!
//! - **TX** (program → host): text assembled by `print` calls into a current
//!   line, completed by `println` into a bounded ring of lines. When the ring
//!   is full the oldest line is overwritten.
//! - **RX** (host → program): raw bytes injected with `rx*` calls into a
//!   bounded byte ring, consumed with `read`/`peek`. Bytes that do not fit are
//!   dropped; unread bytes are never overwritten.
//!
//! Each direction has its own lock, a [`ChangeId`] bumped on every mutation
//! and an [`ActivityStamp`]. Pollers compare ids to detect new data without
//! copying anything.

use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::mem;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::clock::{ActivityStamp, ChangeId};
use crate::sync::lock;

/// Default number of completed lines kept per port.
pub const DEFAULT_LINE_CAPACITY: usize = 1024;

/// Default size of the RX byte ring.
pub const DEFAULT_RX_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct TxState {
    lines: VecDeque<String>,
    current: String,
    /// Sequence number the next completed line will receive.
    next_seq: u64,
}

#[derive(Debug, Default)]
struct RxState {
    bytes: VecDeque<u8>,
}

/// Lines returned by [`SerialPort::lines_after`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineBatch {
    /// New lines, oldest first.
    pub lines: Vec<String>,
    /// Cursor to pass to the next `lines_after` call.
    pub next: u64,
    /// Lines completed after the cursor that are no longer buffered.
    pub dropped: u64,
}

/// Bounded, thread-safe serial port.
#[derive(Debug)]
pub struct SerialPort {
    port_id: u8,
    line_capacity: usize,
    rx_capacity: usize,
    tx: Mutex<TxState>,
    rx: Mutex<RxState>,
    tx_id: ChangeId,
    rx_id: ChangeId,
    last_tx: ActivityStamp,
    last_rx: ActivityStamp,
    ready: AtomicBool,
}

impl SerialPort {
    /// Create a port with the default capacities.
    pub fn new(port_id: u8) -> Self {
        Self::with_capacity(port_id, DEFAULT_LINE_CAPACITY, DEFAULT_RX_CAPACITY)
    }

    /// Create a port with explicit capacities. Zero capacities are raised to one.
    pub fn with_capacity(port_id: u8, line_capacity: usize, rx_capacity: usize) -> Self {
        let line_capacity = line_capacity.max(1);
        let rx_capacity = rx_capacity.max(1);
        Self {
            port_id,
            line_capacity,
            rx_capacity,
            tx: Mutex::new(TxState {
                lines: VecDeque::with_capacity(line_capacity.min(DEFAULT_LINE_CAPACITY)),
                ..TxState::default()
            }),
            rx: Mutex::new(RxState {
                bytes: VecDeque::with_capacity(rx_capacity),
            }),
            tx_id: ChangeId::new(),
            rx_id: ChangeId::new(),
            last_tx: ActivityStamp::new(),
            last_rx: ActivityStamp::new(),
            ready: AtomicBool::new(false),
        }
    }

    pub fn port_id(&self) -> u8 {
        self.port_id
    }

    pub fn line_capacity(&self) -> usize {
        self.line_capacity
    }

    pub fn rx_capacity(&self) -> usize {
        self.rx_capacity
    }

    // --- Readiness ---

    /// Mark the port usable. The baud rate is accepted for source compatibility only.
    pub fn begin(&self, _baud: u32) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn end(&self) {
        self.ready.store(false, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    // --- Change detection ---

    pub fn tx_id(&self) -> u32 {
        self.tx_id.get()
    }

    pub fn rx_id(&self) -> u32 {
        self.rx_id.get()
    }

    /// Time since the last TX mutation, `None` if there was none yet.
    pub fn elapsed_tx(&self) -> Option<Duration> {
        self.last_tx.elapsed()
    }

    /// Time since the last accepted RX batch, `None` if there was none yet.
    pub fn elapsed_rx(&self) -> Option<Duration> {
        self.last_rx.elapsed()
    }

    // --- TX producer ---

    /// Append `value` to the current line.
    ///
    /// Values that render to an empty string leave the port untouched.
    pub fn print(&self, value: impl fmt::Display) {
        let mut tx = lock(&self.tx);
        let before = tx.current.len();
        let _ = write!(tx.current, "{}", value);
        if tx.current.len() != before {
            self.on_tx();
        }
    }

    /// Append `value` and complete the current line.
    pub fn println(&self, value: impl fmt::Display) {
        let mut tx = lock(&self.tx);
        let _ = write!(tx.current, "{}", value);
        self.complete_line(&mut tx);
        self.on_tx();
    }

    /// Complete the current line as is.
    pub fn newline(&self) {
        let mut tx = lock(&self.tx);
        self.complete_line(&mut tx);
        self.on_tx();
    }

    /// Append raw bytes, replacing invalid UTF-8 sequences.
    pub fn print_bytes(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut tx = lock(&self.tx);
        tx.current.push_str(&String::from_utf8_lossy(bytes));
        self.on_tx();
    }

    /// Append raw bytes and complete the current line.
    pub fn println_bytes(&self, bytes: &[u8]) {
        let mut tx = lock(&self.tx);
        tx.current.push_str(&String::from_utf8_lossy(bytes));
        self.complete_line(&mut tx);
        self.on_tx();
    }

    /// Discard all buffered lines and the current line.
    pub fn flush_tx(&self) {
        let mut tx = lock(&self.tx);
        tx.lines.clear();
        tx.current.clear();
        self.on_tx();
    }

    // --- TX consumer ---

    /// Snapshot of the buffered lines, oldest first.
    pub fn buffered_lines(&self) -> Vec<String> {
        lock(&self.tx).lines.iter().cloned().collect()
    }

    /// Number of buffered lines.
    pub fn line_count(&self) -> usize {
        lock(&self.tx).lines.len()
    }

    /// Buffered lines completed at or after `cursor`.
    ///
    /// Cursors count completed lines since the port was created; start at zero
    /// and pass [`LineBatch::next`] back on the following call.
    pub fn lines_after(&self, cursor: u64) -> LineBatch {
        let tx = lock(&self.tx);
        let first = tx.next_seq - tx.lines.len() as u64;
        let start = cursor.clamp(first, tx.next_seq);
        let skip = (start - first) as usize;

        LineBatch {
            lines: tx.lines.iter().skip(skip).cloned().collect(),
            next: tx.next_seq,
            dropped: first.saturating_sub(cursor),
        }
    }

    // --- RX producer ---

    /// Feed raw bytes. Returns the number of bytes accepted.
    ///
    /// Bytes beyond the free space are dropped. The RX id changes once per
    /// call that accepts at least one byte.
    pub fn rx(&self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }
        let mut rx = lock(&self.rx);
        let free = self.rx_capacity - rx.bytes.len();
        let accepted = free.min(data.len());
        if accepted > 0 {
            rx.bytes.extend(&data[..accepted]);
            self.rx_id.bump();
            self.last_rx.touch();
        }
        accepted
    }

    /// Feed a single byte. Returns `false` if the buffer was full.
    pub fn rx_byte(&self, byte: u8) -> bool {
        self.rx(&[byte]) == 1
    }

    pub fn rx_str(&self, text: &str) -> usize {
        self.rx(text.as_bytes())
    }

    /// Feed a line, appending `\n` if it is missing, as a single batch.
    pub fn rx_line(&self, line: &str) -> usize {
        if line.ends_with('\n') {
            return self.rx(line.as_bytes());
        }
        let mut batch = Vec::with_capacity(line.len() + 1);
        batch.extend_from_slice(line.as_bytes());
        batch.push(b'\n');
        self.rx(&batch)
    }

    // --- RX consumer ---

    /// Number of bytes waiting to be read.
    pub fn available(&self) -> usize {
        lock(&self.rx).bytes.len()
    }

    /// Next byte without consuming it.
    pub fn peek(&self) -> Option<u8> {
        lock(&self.rx).bytes.front().copied()
    }

    /// Consume the next byte. `None` when the buffer is empty.
    pub fn read(&self) -> Option<u8> {
        lock(&self.rx).bytes.pop_front()
    }

    /// Consume up to `buf.len()` bytes. Returns the number of bytes read.
    pub fn read_bytes(&self, buf: &mut [u8]) -> usize {
        let mut rx = lock(&self.rx);
        let count = buf.len().min(rx.bytes.len());
        for (slot, byte) in buf.iter_mut().zip(rx.bytes.drain(..count)) {
            *slot = byte;
        }
        count
    }

    /// Discard pending RX bytes. TX history is not affected.
    pub fn flush_rx(&self) {
        lock(&self.rx).bytes.clear();
    }

    /// Legacy device `flush()`: there is no TX queue to wait for, so this clears RX.
    pub fn flush(&self) {
        self.flush_rx();
    }

    fn complete_line(&self, tx: &mut TxState) {
        let line = mem::take(&mut tx.current);
        if tx.lines.len() == self.line_capacity {
            tx.lines.pop_front();
        }
        tx.lines.push_back(line);
        tx.next_seq += 1;
    }

    fn on_tx(&self) {
        self.tx_id.bump();
        self.last_tx.touch();
    }
}
