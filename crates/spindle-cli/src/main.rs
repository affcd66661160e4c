//! Spindle command-line driver
//!
//! Runs load scenarios against one or more reactors and prints their
//! statistics, or prints the default configuration as TOML.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "spindle")]
#[command(about = "Single-threaded task reactor driver", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a load scenario and print reactor statistics
    Run {
        /// Reactor config file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of reactors
        #[arg(short, long, default_value_t = 1)]
        reactors: usize,
        /// Tasks spawned per reactor
        #[arg(short, long, default_value_t = 1000)]
        tasks: usize,
        /// Recurring interval of each task in milliseconds (0 = wake-only)
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
        /// Milliseconds between wake-list batches
        #[arg(long, default_value_t = 5)]
        wake_every_ms: u64,
        /// Tasks per wake-list batch
        #[arg(long, default_value_t = 64)]
        batch: usize,
        /// Scenario length in milliseconds
        #[arg(short, long, default_value_t = 2000)]
        duration_ms: u64,
        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default reactor configuration
    Config {
        /// Validate the config file at this path instead
        #[arg(long)]
        check: Option<PathBuf>,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            reactors,
            tasks,
            interval_ms,
            wake_every_ms,
            batch,
            duration_ms,
            json,
        } => commands::run::execute(commands::run::Scenario {
            config,
            reactors,
            tasks,
            interval_ms,
            wake_every_ms,
            batch,
            duration_ms,
            json,
        }),

        Commands::Config { check } => commands::config::execute(check),
    }
}
