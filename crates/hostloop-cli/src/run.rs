//! Run command implementation for hostloop CLI.
//!
//! Starts a demo program under a `HostManager`, streams serial port 0 to
//! stdout and feeds stdin lines back into it.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use hostloop_core::{HostConfig, HostManager, Program, RunId, TxMonitor};

use crate::colors;
use crate::demos::{Blink, Demo, Echo};

/// Options of `hostloop run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config: Option<PathBuf>,
    pub duration: Option<Duration>,
    pub poll: Duration,
    pub line_capacity: Option<usize>,
}

/// Console command read from stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
    Restart,
    Status,
    Quit,
    /// Anything else goes to the serial port.
    Line(String),
}

impl Command {
    fn parse(line: &str) -> Self {
        match line.trim() {
            ":start" => Command::Start,
            ":stop" => Command::Stop,
            ":restart" => Command::Restart,
            ":status" => Command::Status,
            ":quit" => Command::Quit,
            _ => Command::Line(line.to_string()),
        }
    }
}

/// Execute a demo.
pub fn execute(demo: Demo, options: RunOptions) -> anyhow::Result<()> {
    let config = load_config(&options)?;
    match demo {
        Demo::Blink => run_program(demo, HostManager::<Blink>::with_config(config)?, &options),
        Demo::Echo => run_program(demo, HostManager::<Echo>::with_config(config)?, &options),
    }
}

fn load_config(options: &RunOptions) -> anyhow::Result<HostConfig> {
    let mut config = match &options.config {
        Some(path) => HostConfig::from_json_file(path)?,
        None => HostConfig::default(),
    };
    if let Some(capacity) = options.line_capacity {
        config.line_capacity = capacity;
        config.rx_capacity = config.rx_capacity.min(capacity);
    }
    config.validate()?;
    Ok(config)
}

fn run_program<P: Program>(demo: Demo, manager: HostManager<P>, options: &RunOptions) -> anyhow::Result<()> {
    let mut monitor = TxMonitor::spawn(manager.board().clone(), 0, options.poll, |batch| {
        if batch.dropped > 0 {
            println!("{}... {} lines dropped{}", colors::DIM, batch.dropped, colors::RESET);
        }
        for line in &batch.lines {
            println!("{}", line);
        }
        colors::flush_stdout();
    })?;

    let run_id = start(&manager)?;
    eprintln!(
        "{}Running{} {} ({})",
        colors::BOLD,
        colors::RESET,
        demo.name(),
        run_id
    );

    let input = spawn_stdin_reader();
    let deadline = options.duration.map(|duration| Instant::now() + duration);
    let mut stdin_open = true;

    loop {
        let received = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    break;
                }
                if stdin_open {
                    input.recv_timeout(left)
                } else {
                    thread::sleep(left);
                    break;
                }
            }
            None => input.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        let command = match received {
            Ok(line) => Command::parse(&line),
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => {
                stdin_open = false;
                if deadline.is_none() {
                    break;
                }
                continue;
            }
        };

        match command {
            Command::Start | Command::Restart => {
                let run_id = start(&manager)?;
                eprintln!("{}Started{} {}", colors::GREEN, colors::RESET, run_id);
            }
            Command::Stop => {
                manager.stop();
                eprintln!("{}Stopped{}", colors::YELLOW, colors::RESET);
            }
            Command::Status => print_status(&manager),
            Command::Quit => break,
            Command::Line(line) => {
                if !manager.is_running() {
                    tracing::warn!("program not running; input dropped");
                    continue;
                }
                let accepted = manager.board().serial().rx_line(&line);
                if accepted < line.len() + 1 {
                    tracing::warn!(accepted, "serial RX buffer full; input truncated");
                }
            }
        }
    }

    manager.stop();
    monitor.stop();
    Ok(())
}

/// Start a fresh instance and wait until `setup` has returned, so input
/// sent afterwards is not wiped by the board reset.
fn start<P: Program>(manager: &HostManager<P>) -> anyhow::Result<RunId> {
    let run_id = manager.start()?;
    if let Err(e) = manager.post_and_wait(|| ()) {
        tracing::debug!(run = %run_id, "program ended during setup: {}", e);
    }
    Ok(run_id)
}

fn print_status<P: Program>(manager: &HostManager<P>) {
    let serial = manager.board().serial();
    let state = if manager.is_running() {
        format!("{}running{}", colors::GREEN, colors::RESET)
    } else {
        format!("{}stopped{}", colors::RED, colors::RESET)
    };
    let run = manager
        .run_id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    eprintln!(
        "{}status{} {} {} {}tx={} rx={} lines={}{}",
        colors::CYAN,
        colors::RESET,
        run,
        state,
        colors::DIM,
        serial.tx_id(),
        serial.rx_id(),
        serial.line_count(),
        colors::RESET
    );
}

/// Forward stdin lines to a channel; the channel closes at EOF.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
