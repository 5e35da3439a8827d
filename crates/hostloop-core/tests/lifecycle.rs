//! Integration tests for start/stop/restart and fault handling.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use hostloop_core::{Context, Error, HostConfig, HostManager, LoopPhase, Program};

// =============================================================================
// Test Helpers
// =============================================================================

/// Poll `condition` until it holds or five seconds passed.
fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Tracks how many loop threads are inside `run` at once.
#[derive(Default)]
struct Overlap {
    live: AtomicUsize,
    max_live: AtomicUsize,
    setups: AtomicUsize,
    teardowns: AtomicUsize,
}

struct Tracked {
    overlap: Arc<Overlap>,
}

impl Program for Tracked {
    fn setup(&mut self, _ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        let live = self.overlap.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.overlap.max_live.fetch_max(live, Ordering::SeqCst);
        self.overlap.setups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn loop_once(&mut self, _ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        thread::sleep(Duration::from_millis(1));
        Ok(())
    }

    fn teardown(&mut self, _ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        self.overlap.live.fetch_sub(1, Ordering::SeqCst);
        self.overlap.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn tracked_manager(overlap: &Arc<Overlap>) -> HostManager<Tracked> {
    let overlap = Arc::clone(overlap);
    HostManager::with_factory(HostConfig::default(), move || Tracked {
        overlap: Arc::clone(&overlap),
    })
    .unwrap()
}

// =============================================================================
// Start / Stop
// =============================================================================

#[test]
fn test_stop_twice_is_noop() {
    let overlap = Arc::new(Overlap::default());
    let manager = tracked_manager(&overlap);
    manager.start().unwrap();
    assert!(manager.is_running());

    manager.stop();
    assert!(!manager.is_running());
    manager.stop();
    assert!(!manager.is_running());
    assert_eq!(overlap.teardowns.load(Ordering::SeqCst), 1);
}

#[test]
fn test_restart_never_overlaps() {
    let overlap = Arc::new(Overlap::default());
    let manager = tracked_manager(&overlap);
    for _ in 0..10 {
        manager.start().unwrap();
        assert!(wait_until(|| overlap.live.load(Ordering::SeqCst) == 1));
    }
    manager.stop();

    assert_eq!(overlap.setups.load(Ordering::SeqCst), 10);
    assert_eq!(overlap.teardowns.load(Ordering::SeqCst), 10);
    assert_eq!(overlap.max_live.load(Ordering::SeqCst), 1);
}

#[test]
fn test_start_after_stop_works() {
    let overlap = Arc::new(Overlap::default());
    let manager = tracked_manager(&overlap);
    let first = manager.start().unwrap();
    manager.stop();
    let second = manager.start().unwrap();
    assert!(second > first);
    assert!(manager.is_running());
}

#[test]
fn test_drop_stops_instance() {
    let overlap = Arc::new(Overlap::default());
    let manager = tracked_manager(&overlap);
    manager.start().unwrap();
    let looper = manager.instance().unwrap();
    drop(manager);
    assert_eq!(looper.phase(), LoopPhase::Stopped);
    assert_eq!(overlap.teardowns.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Faults
// =============================================================================

#[derive(Default)]
struct Faulty {
    torn_down: Arc<AtomicBool>,
}

impl Program for Faulty {
    fn setup(&mut self, ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        ctx.serial().begin(115_200);
        Ok(())
    }

    fn serial_event(&mut self, ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        while let Some(byte) = ctx.serial().read() {
            if byte == b'!' {
                panic!("bad command");
            }
        }
        Ok(())
    }

    fn teardown(&mut self, _ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        self.torn_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_panic_stops_run_and_reports_fault() {
    let torn_down = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&torn_down);
    let manager = HostManager::with_factory(HostConfig::default(), move || Faulty {
        torn_down: Arc::clone(&flag),
    })
    .unwrap();
    manager.start().unwrap();
    assert!(wait_until(|| manager.board().serial().is_ready()));

    manager.board().serial().rx_line("!");
    assert!(wait_until(|| !manager.is_running()));

    let lines = manager.board().serial().buffered_lines();
    assert_eq!(lines.last().map(String::as_str), Some("!fault: panic: bad command"));
    assert!(!torn_down.load(Ordering::SeqCst));

    // The dead instance rejects work; a restart gives a fresh one.
    assert!(matches!(manager.post(|| {}), Err(Error::NotRunning)));
    manager.start().unwrap();
    assert!(manager.is_running());
    assert!(wait_until(|| manager.board().serial().buffered_lines().is_empty()));
}

struct FailsInSetup;

impl Program for FailsInSetup {
    fn setup(&mut self, _ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        anyhow::bail!("no sensor on bus 2")
    }
}

#[test]
fn test_setup_error_is_reported() {
    let manager = HostManager::with_factory(HostConfig::default(), || FailsInSetup).unwrap();
    manager.start().unwrap();
    assert!(wait_until(|| !manager.is_running()));
    assert_eq!(
        manager.board().serial().buffered_lines(),
        vec!["!fault: no sensor on bus 2".to_string()]
    );
    manager.stop();
}

// =============================================================================
// Serial events
// =============================================================================

#[derive(Default)]
struct LineCollector {
    lines: Arc<Mutex<Vec<String>>>,
    pending: String,
}

impl Program for LineCollector {
    fn setup(&mut self, ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        ctx.serial().begin(9600);
        Ok(())
    }

    fn serial_event(&mut self, ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        while let Some(byte) = ctx.serial().read() {
            if byte == b'\n' {
                let line = std::mem::take(&mut self.pending);
                ctx.serial().println(format_args!("got {}", line));
                self.lines.lock().unwrap().push(line);
            } else {
                self.pending.push(byte as char);
            }
        }
        Ok(())
    }
}

#[test]
fn test_serial_event_fires_on_rx() {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let shared = Arc::clone(&lines);
    let manager = HostManager::with_factory(HostConfig::default(), move || LineCollector {
        lines: Arc::clone(&shared),
        pending: String::new(),
    })
    .unwrap();
    manager.start().unwrap();
    assert!(wait_until(|| manager.board().serial().is_ready()));

    manager.board().serial().rx_line("ping");
    assert!(wait_until(|| lines.lock().unwrap().len() == 1));
    manager.board().serial().rx_line("pong");
    assert!(wait_until(|| lines.lock().unwrap().len() == 2));

    assert_eq!(*lines.lock().unwrap(), vec!["ping", "pong"]);
    assert_eq!(manager.board().serial().buffered_lines(), vec!["got ping", "got pong"]);
    manager.stop();
}

#[test]
fn test_serial_event_requires_open_port() {
    #[derive(Default)]
    struct Closed {
        events: usize,
    }
    impl Program for Closed {
        fn serial_event(&mut self, _ctx: &Context<'_, Self>) -> anyhow::Result<()> {
            self.events += 1;
            Ok(())
        }
    }

    let manager = HostManager::<Closed>::new();
    manager.start().unwrap();
    manager.board().serial().rx_line("ignored");
    // Two round trips guarantee at least one full iteration after the RX.
    manager.post_and_wait(|| ()).unwrap();
    manager.post_and_wait(|| ()).unwrap();
    let events = manager
        .call_program(|program: &mut Closed, _: &Context<'_, Closed>| program.events)
        .unwrap();
    assert_eq!(events, 0);
}

// =============================================================================
// Stop from inside the program
// =============================================================================

#[derive(Default)]
struct SelfStopping {
    iterations: usize,
}

impl Program for SelfStopping {
    fn loop_once(&mut self, ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        self.iterations += 1;
        if self.iterations == 10 {
            ctx.request_stop();
        }
        Ok(())
    }
}

#[test]
fn test_program_can_request_stop() {
    let manager = HostManager::<SelfStopping>::new();
    manager.start().unwrap();
    assert!(wait_until(|| !manager.is_running()));
    assert_eq!(manager.instance().map(|looper| looper.phase()), Some(LoopPhase::Stopped));
    manager.stop();
    assert!(manager.instance().is_none());
}

#[derive(Default)]
struct Idle;

impl Program for Idle {}

#[test]
fn test_lifecycle_calls_from_loop_thread() {
    let manager = Arc::new(HostManager::<Idle>::new());
    manager.start().unwrap();

    let inner = Arc::clone(&manager);
    let result = manager.post_and_wait(move || inner.start().map(|_| ())).unwrap();
    assert!(matches!(result, Err(Error::LoopThreadCall)));

    // Stop from the loop thread only requests cancellation.
    let inner = Arc::clone(&manager);
    manager.post(move || inner.stop()).unwrap();
    assert!(wait_until(|| !manager.is_running()));
    assert!(manager.instance().is_some());

    manager.stop();
    assert!(manager.instance().is_none());
}

#[test]
fn test_lifecycle_calls_on_another_manager_from_loop_thread() {
    let outer = HostManager::<Idle>::new();
    let overlap = Arc::new(Overlap::default());
    let inner = Arc::new(tracked_manager(&overlap));
    outer.start().unwrap();

    let target = Arc::clone(&inner);
    let started = outer.post_and_wait(move || target.start()).unwrap();
    assert!(started.is_ok());
    assert!(inner.is_running());

    // A full stop with join, not just a cancellation request.
    let target = Arc::clone(&inner);
    outer.post_and_wait(move || target.stop()).unwrap();
    assert!(inner.instance().is_none());
    assert_eq!(overlap.teardowns.load(Ordering::SeqCst), 1);

    outer.stop();
}
