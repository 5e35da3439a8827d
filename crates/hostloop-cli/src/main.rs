//! hostloop CLI - run embedded setup/loop programs against an emulated board.

mod colors;
mod demos;
mod run;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use demos::Demo;
use run::RunOptions;

#[derive(Parser)]
#[command(name = "hostloop")]
#[command(about = "Run embedded setup/loop programs on a host worker thread")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in demo programs
    List,

    /// Run a demo program, streaming serial port 0 over stdin/stdout
    Run {
        /// Demo program to run
        #[arg(value_enum)]
        demo: Demo,

        /// JSON host configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Stop after this many seconds instead of waiting for stdin EOF
        #[arg(long)]
        duration: Option<f64>,

        /// Serial output poll period in milliseconds
        #[arg(long, default_value = "50")]
        poll_ms: u64,

        /// Completed TX lines kept per serial port
        #[arg(long)]
        line_capacity: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format hostloop-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(core_err) = err.downcast_ref::<hostloop_core::Error>() {
            anyhow::anyhow!("{}", core_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::List => list_demos(),

        Commands::Run {
            demo,
            config,
            duration,
            poll_ms,
            line_capacity,
        } => {
            let duration = duration
                .map(|secs| {
                    Duration::try_from_secs_f64(secs)
                        .map_err(|_| anyhow::anyhow!("--duration must be a non-negative number of seconds"))
                })
                .transpose()?;
            let options = RunOptions {
                config,
                duration,
                poll: Duration::from_millis(poll_ms.max(1)),
                line_capacity,
            };
            run::execute(demo, options).map_err(format_error)?;
        }
    }

    Ok(())
}

fn list_demos() {
    println!("{}Demo programs:{}", colors::BOLD, colors::RESET);
    for demo in Demo::all() {
        println!(
            "  {}{:<8}{} {}",
            colors::CYAN,
            demo.name(),
            colors::RESET,
            demo.description()
        );
    }
}
