//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Sticky Dispatch - sticky-key shared-subscription dispatcher
#[derive(Parser, Debug)]
#[command(
    name = "sticky-dispatch",
    author,
    version,
    about = "Sticky-key shared-subscription dispatcher",
    long_about = "Routes log entries of a shared subscription to consumers so that every \n\
                  message key sticks to one consumer, under per-consumer flow control.\n\n\
                  Validates dispatcher configuration, shows hash ring ownership, and \n\
                  runs an in-memory simulated workload through the dispatcher."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "STICKY_DISPATCH_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "STICKY_DISPATCH_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a simulated workload through the dispatcher
    Simulate(SimulateArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration and hash ring ownership
    Info(InfoArgs),
}

/// Arguments for the `simulate` command
#[derive(Parser, Debug, Clone)]
pub struct SimulateArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "dispatch.toml",
        env = "STICKY_DISPATCH_CONFIG"
    )]
    pub config: PathBuf,

    /// Override the number of published payload entries
    #[arg(long, env = "STICKY_DISPATCH_MESSAGES")]
    pub messages: Option<u64>,

    /// Override the number of distinct keys
    #[arg(long, env = "STICKY_DISPATCH_KEYS")]
    pub keys: Option<u32>,

    /// Override the simulation timeout in seconds
    #[arg(long, env = "STICKY_DISPATCH_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Override the Prometheus listener port (0 = disabled)
    #[arg(long, env = "STICKY_DISPATCH_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Output the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "dispatch.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "dispatch.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show the hash ranges owned by each consumer
    #[arg(long)]
    pub ranges: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for contracts::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
