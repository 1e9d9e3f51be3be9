//! Command-line interface definitions using clap derive macros.
//!
//! Contains the top-level [`Cli`] parser, the [`Commands`] enum for
//! subcommands (run, validate, health), and their associated argument
//! structs. Flags that override the static configuration file have an
//! environment variable equivalent for container deployments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "signpost",
    version,
    about = "Service discovery aggregator feeding a routing configuration",
    propagate_version = true,
    after_help = "\x1b[1mQuick start:\x1b[0m\n  \
        signpost run                         Start with ./signpost.toml\n  \
        signpost run -c edge.toml            Start with a specific config\n  \
        signpost validate edge.toml          Check a config without starting"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the providers, the watcher and the API server
    Run(Box<RunArgs>),

    /// Validate a static or dynamic config file without starting
    Validate(ValidateArgs),

    /// Check health of a running instance
    Health(HealthArgs),
}

#[derive(Args)]
#[command(after_help = "\x1b[1mExamples:\x1b[0m\n  \
        signpost run                                   Auto-detect config\n  \
        signpost run -c edge.toml                      Specific config file\n  \
        signpost run -c edge.toml -a 127.0.0.1:9000    Override the API address\n  \
        signpost run --throttle-ms 500 --pretty        Local dev mode")]
pub struct RunArgs {
    /// Config file path (.toml, .yaml, .json)
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// API listen address, overrides `api.address`
    #[arg(short, long, env = "SIGNPOST_API_ADDRESS")]
    pub address: Option<String>,

    /// Minimum delay between two applied updates of one provider,
    /// overrides `providers_throttle_ms`
    #[arg(long, env = "SIGNPOST_THROTTLE_MS", help_heading = "Tuning")]
    pub throttle_ms: Option<u64>,

    // -- Logging --
    /// Log level
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Force pretty (human-readable) log output
    #[arg(long)]
    pub pretty: bool,

    /// Force JSON log output (overrides TTY detection)
    #[arg(long, conflicts_with = "pretty")]
    pub json: bool,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Config file to validate
    #[arg(default_value = "signpost.toml")]
    pub config: PathBuf,

    /// Treat the file as a dynamic configuration (backends and frontends)
    #[arg(long)]
    pub dynamic: bool,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: ValidateFormat,
}

#[derive(Args)]
pub struct HealthArgs {
    /// URL of the running instance
    #[arg(default_value = "http://localhost:8080")]
    pub url: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn to_tracing_level(&self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Clone, Debug, ValueEnum)]
pub enum ValidateFormat {
    Text,
    Json,
}
