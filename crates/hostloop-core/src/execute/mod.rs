//! Execution engine for emulated embedded programs.
//!
//! A [`Program`] is driven by an [`ExecutionLoop`] on a dedicated worker
//! thread. Other threads never touch the program directly: they post
//! closures that the loop executes between iterations.
//!
//! # Architecture
//!
//! ```text
//! HostManager<P>
//!     │
//!     ├── start() ── joins the old WorkerThread, then:
//!     │       └── ExecutionLoop<P> (fresh, new RunId)
//!     │               └── WorkerThread ── spawns ── run()
//!     │                                               │
//!     │                                               ├── Board::reset
//!     │                                               ├── setup
//!     │                                               ├── loop: serial_event? → loop_once → drain
//!     │                                               └── teardown
//!     │
//!     └── post / post_and_wait / post_to_program / call_program
//!             └── Dispatcher (FIFO, drained on the loop thread)
//! ```
//!
//! # Module Structure
//!
//! - `context` - Program trait and callback context
//! - `dispatch` - Cross-thread job queue with idle wait
//! - `execution_loop` - The loop itself and its posting API
//! - `manager` - HostManager for clean-slate restarts
//! - `state` - Loop lifecycle phases
//! - `worker` - WorkerThread owning the OS thread

mod context;
mod dispatch;
mod execution_loop;
mod manager;
mod state;
mod worker;

pub use context::{Context, Program};
pub use execution_loop::ExecutionLoop;
pub use manager::HostManager;
pub use state::LoopPhase;
pub use worker::WorkerThread;
