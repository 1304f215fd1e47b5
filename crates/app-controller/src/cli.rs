//! Command line interface of the `app-controller` binary.
//!
//! ```text
//! app-controller run --config /etc/pf9/app-controller/config.yaml
//! app-controller migrate
//! app-controller version
//! ```

use std::path::PathBuf;

use app_controller_telemetry::tracing::TelemetryOptions;
use clap::{Args, Parser};

use crate::config::DEFAULT_CONFIG_FILE;

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Eq, clap::Subcommand)]
pub enum Command {
    /// Serve the tenant API.
    Run(RunArguments),

    /// Apply pending database migrations and exit.
    Migrate(MigrateArguments),

    /// Print the version and exit.
    Version,
}

/// Arguments of the `run` subcommand.
#[derive(Debug, PartialEq, Eq, Args)]
pub struct RunArguments {
    /// Path to the configuration FILE.
    #[arg(long, short = 'c', value_name = "FILE", default_value = DEFAULT_CONFIG_FILE, env = "APP_CONTROLLER_CONFIG")]
    pub config: PathBuf,

    #[command(flatten)]
    pub telemetry: TelemetryOptions,
}

/// Arguments of the `migrate` subcommand.
#[derive(Debug, PartialEq, Eq, Args)]
pub struct MigrateArguments {
    /// Path to the configuration FILE.
    #[arg(long, short = 'c', value_name = "FILE", default_value = DEFAULT_CONFIG_FILE, env = "APP_CONTROLLER_CONFIG")]
    pub config: PathBuf,

    #[command(flatten)]
    pub telemetry: TelemetryOptions,
}
