//! Timestamp and change-id utilities.
//!
//! Pollers on other threads never inspect buffered data directly to decide
//! whether something happened. They compare a [`ChangeId`] against the value
//! they saw last time (via [`ChangeTracker`]) and only then take a lock and
//! copy. The numeric value of an id carries no meaning beyond "different".

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic change counter.
///
/// Wraps on overflow; readers only ever test for inequality.
#[derive(Debug, Default)]
pub struct ChangeId(AtomicU32);

impl ChangeId {
    pub fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Record one change and return the new id.
    pub fn bump(&self) -> u32 {
        self.0.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// Explicit reset back to zero.
    pub fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }
}

/// Reader-side memory of the last observed [`ChangeId`] value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeTracker {
    last: Option<u32>,
}

impl ChangeTracker {
    /// Tracker whose first observation always reports a change.
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Tracker already in sync with `id`.
    pub fn synced(id: u32) -> Self {
        Self { last: Some(id) }
    }

    /// Record `current` and report whether it differs from the last value.
    pub fn observe(&mut self, current: u32) -> bool {
        let changed = self.last != Some(current);
        self.last = Some(current);
        changed
    }

    pub fn last(&self) -> Option<u32> {
        self.last
    }
}

/// Last-activity timestamp that can be written and read without locking.
#[derive(Debug)]
pub struct ActivityStamp {
    epoch: Instant,
    /// Microseconds since `epoch`, plus one. Zero means "never".
    last: AtomicU64,
}

impl ActivityStamp {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let micros = self.epoch.elapsed().as_micros() as u64;
        self.last.store(micros.saturating_add(1), Ordering::Release);
    }

    pub fn clear(&self) {
        self.last.store(0, Ordering::Release);
    }

    /// Time since the last [`touch`](Self::touch), or `None` if never touched.
    pub fn elapsed(&self) -> Option<Duration> {
        match self.last.load(Ordering::Acquire) {
            0 => None,
            stamp => {
                let at = Duration::from_micros(stamp - 1);
                Some(self.epoch.elapsed().saturating_sub(at))
            }
        }
    }
}

impl Default for ActivityStamp {
    fn default() -> Self {
        Self::new()
    }
}

/// Device clock counting from the last reset.
///
/// `millis`/`micros` truncate to `u32` and therefore wrap like the device
/// counters they emulate.
#[derive(Debug)]
pub struct BootClock {
    epoch: Instant,
    boot_micros: AtomicU64,
}

impl BootClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            boot_micros: AtomicU64::new(0),
        }
    }

    pub fn reset(&self) {
        let now = self.epoch.elapsed().as_micros() as u64;
        self.boot_micros.store(now, Ordering::Release);
    }

    pub fn uptime(&self) -> Duration {
        let now = self.epoch.elapsed().as_micros() as u64;
        let boot = self.boot_micros.load(Ordering::Acquire);
        Duration::from_micros(now.saturating_sub(boot))
    }

    pub fn millis(&self) -> u32 {
        self.uptime().as_millis() as u32
    }

    pub fn micros(&self) -> u32 {
        self.uptime().as_micros() as u32
    }
}

impl Default for BootClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier of one program run started by a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(u64);

impl RunId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}
