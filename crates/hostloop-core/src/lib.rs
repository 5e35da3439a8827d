//! Core engine for hosting embedded `setup`/`loop` programs on a desktop.
//!
//! This crate provides:
//! - Bounded serial ports with change ids for lock-free polling
//! - An emulated board: serial ports, digital pins and a boot clock
//! - A single-threaded execution loop with a cross-thread dispatch queue
//! - Worker thread and instance management with clean-slate restarts
//! - A TX monitor that streams serial output to other threads

pub mod board;
pub mod clock;
pub mod config;
pub mod error;
pub mod execute;
pub mod monitor;
pub mod serial;

mod sync;

pub use board::{Board, LED_BUILTIN, Level, PinMode, PinState};
pub use clock::{ActivityStamp, BootClock, ChangeId, ChangeTracker, RunId};
pub use config::HostConfig;
pub use error::{Error, Result};
pub use execute::{Context, ExecutionLoop, HostManager, LoopPhase, Program, WorkerThread};
pub use monitor::{DEFAULT_POLL_PERIOD, LinePoller, TxMonitor};
pub use serial::{LineBatch, SerialPort};
