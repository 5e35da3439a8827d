//! Owner of the current program instance.

use std::sync::{Arc, Mutex};

use crate::board::Board;
use crate::clock::RunId;
use crate::config::HostConfig;
use crate::error::{Error, Result};
use crate::sync::lock;

use super::context::{Context, Program};
use super::execution_loop::ExecutionLoop;
use super::worker::WorkerThread;

type Factory<P> = Box<dyn Fn() -> P + Send + Sync>;

/// Lifecycle bookkeeping, held for the whole of `start` and `stop`.
struct Slot {
    worker: WorkerThread,
    last_run: RunId,
}

/// Runs at most one instance of a program at a time.
///
/// Every `start` builds a fresh program from the factory and a fresh
/// [`ExecutionLoop`], after the previous instance's thread has been joined.
/// The board outlives the instances: each run begins with a board reset.
///
/// ```no_run
/// use hostloop_core::execute::{Context, HostManager, Program};
///
/// #[derive(Default)]
/// struct Hello;
///
/// impl Program for Hello {
///     fn setup(&mut self, ctx: &Context<'_, Self>) -> anyhow::Result<()> {
///         ctx.serial().begin(9600);
///         ctx.serial().println("hello");
///         Ok(())
///     }
/// }
///
/// let manager = HostManager::<Hello>::new();
/// manager.start()?;
/// manager.stop();
/// # Ok::<(), hostloop_core::Error>(())
/// ```
pub struct HostManager<P: Program> {
    board: Arc<Board>,
    config: HostConfig,
    factory: Factory<P>,
    slot: Mutex<Slot>,
    /// Never held across a blocking call, so loop threads may take it.
    /// Set before the worker spawns and cleared after it is joined.
    current: Mutex<Option<Arc<ExecutionLoop<P>>>>,
}

impl<P: Program + Default> HostManager<P> {
    /// Manager with the default configuration and `P::default()` programs.
    pub fn new() -> Self {
        Self::from_parts(HostConfig::default(), Box::new(P::default))
    }

    pub fn with_config(config: HostConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(config, Box::new(P::default)))
    }
}

impl<P: Program + Default> Default for HostManager<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Program> HostManager<P> {
    /// Manager that builds each program instance with `factory`.
    pub fn with_factory<F>(config: HostConfig, factory: F) -> Result<Self>
    where
        F: Fn() -> P + Send + Sync + 'static,
    {
        config.validate()?;
        Ok(Self::from_parts(config, Box::new(factory)))
    }

    /// Manager driving an existing board.
    pub fn with_board<F>(board: Arc<Board>, config: HostConfig, factory: F) -> Result<Self>
    where
        F: Fn() -> P + Send + Sync + 'static,
    {
        config.validate()?;
        if board.ports().is_empty() {
            return Err(Error::Config("board must have at least one serial port".into()));
        }
        Ok(Self {
            board,
            slot: Mutex::new(Slot {
                worker: WorkerThread::new(config.thread_name.clone()),
                last_run: RunId::new(0),
            }),
            config,
            factory: Box::new(factory),
            current: Mutex::new(None),
        })
    }

    fn from_parts(config: HostConfig, factory: Factory<P>) -> Self {
        Self {
            board: Arc::new(Board::new(&config)),
            slot: Mutex::new(Slot {
                worker: WorkerThread::new(config.thread_name.clone()),
                last_run: RunId::new(0),
            }),
            config,
            factory,
            current: Mutex::new(None),
        }
    }

    pub fn board(&self) -> &Arc<Board> {
        &self.board
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// The current instance, if any.
    pub fn instance(&self) -> Option<Arc<ExecutionLoop<P>>> {
        lock(&self.current).clone()
    }

    /// Whether an instance exists and its loop has not exited.
    pub fn is_running(&self) -> bool {
        self.instance().is_some_and(|looper| looper.is_running())
    }

    /// Id of the current instance, if any.
    pub fn run_id(&self) -> Option<RunId> {
        self.instance().map(|looper| looper.run_id())
    }

    /// Replace the current instance with a fresh one.
    ///
    /// The previous instance's thread is joined before the new one is
    /// spawned. Fails with `Error::LoopThreadCall` from this manager's own
    /// loop thread, which cannot wait for itself.
    pub fn start(&self) -> Result<RunId> {
        if self.on_worker_thread() {
            return Err(Error::LoopThreadCall);
        }

        let mut slot = lock(&self.slot);
        self.stop_locked(&mut slot);

        let run_id = slot.last_run.next();
        slot.last_run = run_id;
        let looper = Arc::new(ExecutionLoop::new(Arc::clone(&self.board), run_id, &self.config));
        let program = (self.factory)();

        *lock(&self.current) = Some(Arc::clone(&looper));
        if let Err(e) = slot.worker.start(&looper, program) {
            *lock(&self.current) = None;
            return Err(e);
        }
        tracing::info!(run = %run_id, "instance started");
        Ok(run_id)
    }

    /// Stop and discard the current instance. No-op if there is none.
    ///
    /// From this manager's own loop thread this only requests cancellation;
    /// the instance is discarded by the next `start` or `stop`.
    pub fn stop(&self) {
        if let Some(looper) = self.instance()
            && looper.is_loop_thread()
        {
            tracing::warn!(run = %looper.run_id(), "stop called from the loop thread; cancelling without join");
            looper.on_stop();
            return;
        }

        let mut slot = lock(&self.slot);
        self.stop_locked(&mut slot);
    }

    /// The instance stays visible until its thread is joined, so a program
    /// calling back into the manager during teardown is still recognized.
    fn stop_locked(&self, slot: &mut Slot) {
        let Some(looper) = self.instance() else {
            return;
        };
        slot.worker.stop(&looper);
        *lock(&self.current) = None;
        tracing::info!(run = %looper.run_id(), "instance stopped");
    }

    fn on_worker_thread(&self) -> bool {
        self.instance().is_some_and(|looper| looper.is_loop_thread())
    }

    /// See [`ExecutionLoop::post`].
    pub fn post<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.require_instance()?.post(f)
    }

    /// See [`ExecutionLoop::post_and_wait`].
    pub fn post_and_wait<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.require_instance()?.post_and_wait(f)
    }

    /// See [`ExecutionLoop::post_to_program`].
    pub fn post_to_program<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut P, &Context<'_, P>) + Send + 'static,
    {
        self.require_instance()?.post_to_program(f)
    }

    /// See [`ExecutionLoop::call_program`].
    pub fn call_program<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut P, &Context<'_, P>) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.require_instance()?.call_program(f)
    }

    fn require_instance(&self) -> Result<Arc<ExecutionLoop<P>>> {
        self.instance().ok_or(Error::NotRunning)
    }
}

impl<P: Program> Drop for HostManager<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Tally {
        count: u32,
    }

    impl Program for Tally {
        fn loop_once(&mut self, _ctx: &Context<'_, Self>) -> anyhow::Result<()> {
            std::thread::sleep(Duration::from_millis(1));
            Ok(())
        }
    }

    #[test]
    fn test_not_running_before_start() {
        let manager = HostManager::<Tally>::new();
        assert!(!manager.is_running());
        assert!(manager.run_id().is_none());
        assert!(matches!(manager.post(|| {}), Err(Error::NotRunning)));
        manager.stop();
    }

    #[test]
    fn test_start_allocates_new_run_ids() {
        let manager = HostManager::<Tally>::new();
        let first = manager.start().unwrap();
        let second = manager.start().unwrap();
        assert_ne!(first, second);
        assert_eq!(manager.run_id(), Some(second));
        manager.stop();
        assert!(!manager.is_running());
    }

    #[test]
    fn test_restart_gives_fresh_program() {
        let manager = HostManager::<Tally>::new();
        manager.start().unwrap();
        manager
            .post_to_program(|program: &mut Tally, _: &Context<'_, Tally>| program.count = 7)
            .unwrap();
        let count = manager
            .call_program(|program: &mut Tally, _: &Context<'_, Tally>| program.count)
            .unwrap();
        assert_eq!(count, 7);

        manager.start().unwrap();
        let count = manager
            .call_program(|program: &mut Tally, _: &Context<'_, Tally>| program.count)
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_with_config_validates() {
        let config = HostConfig::default().with_serial_ports(0);
        assert!(matches!(HostManager::<Tally>::with_config(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_with_board_rejects_board_without_serial_port() {
        let board = Arc::new(Board::new(&HostConfig::default().with_serial_ports(0)));
        let result = HostManager::with_board(board, HostConfig::default(), Tally::default);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_factory_builds_each_instance() {
        let manager = HostManager::with_factory(HostConfig::default(), || Tally { count: 3 }).unwrap();
        manager.start().unwrap();
        let count = manager
            .call_program(|program: &mut Tally, _: &Context<'_, Tally>| program.count)
            .unwrap();
        assert_eq!(count, 3);
    }
}
