//! Initialises the [`tracing`] subscribers for console and rolling file output.
//!
//! ```no_run
//! use app_controller_telemetry::tracing::{Error, TelemetryOptions, Tracing};
//!
//! fn main() -> Result<(), Error> {
//!     let _tracing_guard = Tracing::pre_configured("app-controller", TelemetryOptions::default())
//!         .init()?;
//!
//!     tracing::info!("log a message");
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables and CLI Arguments
//!
//! - `CONSOLE_LOG_DISABLED` (`--console-log-disabled`): Disables console logs when set to `true`.
//! - `CONSOLE_LOG_LEVEL`: Set the log level for the console logs.
//! - `FILE_LOG_DIRECTORY` (`--file-log-directory`): Enable the file logs and set the file log directory.
//! - `FILE_LOG_ROTATION_PERIOD` (`--file-log-rotation-period`): Set the rotation period of log files.
//! - `FILE_LOG_LEVEL`: Set the log level for file logs.

use std::path::PathBuf;

use snafu::{ResultExt as _, Snafu};
use tracing::{level_filters::LevelFilter, subscriber::SetGlobalDefaultError};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, filter::Directive, layer::SubscriberExt};

use crate::tracing::settings::{ConsoleLogSettings, FileLogSettings};

pub mod settings;

type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors which can be encountered when initialising [`Tracing`].
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to initialize rolling file appender in {file_log_dir:?}"))]
    InitRollingFileAppender {
        source: InitError,
        file_log_dir: PathBuf,
    },

    #[snafu(display("unable to set the global default subscriber"))]
    SetGlobalDefaultSubscriber { source: SetGlobalDefaultError },
}

/// A configured set of [`tracing`] subscribers.
///
/// Hold on to the value returned by [`Tracing::init`] for as long as the process runs. Name the
/// variable, `let _ = ...` drops it immediately.
#[derive(Debug)]
pub struct Tracing {
    service_name: &'static str,
    console_log_settings: ConsoleLogSettings,
    file_log_settings: FileLogSettings,
}

impl Tracing {
    /// The environment variable used to set the console log level filter.
    pub const CONSOLE_LOG_LEVEL: &str = "CONSOLE_LOG_LEVEL";
    /// The environment variable used to set the rolling file log level filter.
    pub const FILE_LOG_LEVEL: &str = "FILE_LOG_LEVEL";
    /// The filename suffix used for the rolling file logs.
    pub const FILE_LOG_SUFFIX: &str = "log.json";

    pub fn builder(service_name: &'static str) -> TracingBuilder {
        TracingBuilder {
            service_name,
            console_log_settings: ConsoleLogSettings::default(),
            file_log_settings: FileLogSettings::default(),
        }
    }

    /// Returns a [`Tracing`] instance configured from the [`TelemetryOptions`].
    ///
    /// Console and file logs default to the INFO level. If no rotation period is given, log files
    /// are never rolled over.
    pub fn pre_configured(service_name: &'static str, options: TelemetryOptions) -> Self {
        let TelemetryOptions {
            console_log_disabled,
            file_log_directory,
            file_log_rotation_period,
        } = options;

        let rotation_period: Rotation = file_log_rotation_period.unwrap_or_default().into();

        Self::builder(service_name)
            .with_console_output((
                Self::CONSOLE_LOG_LEVEL,
                LevelFilter::INFO,
                !console_log_disabled,
            ))
            .with_file_output(file_log_directory.map(|file_log_dir| {
                (
                    Self::FILE_LOG_LEVEL,
                    LevelFilter::INFO,
                    file_log_dir,
                    rotation_period,
                )
            }))
            .build()
    }

    /// Installs the configured subscribers as the global default.
    pub fn init(self) -> Result<Self> {
        let mut layers: Vec<Box<dyn Layer<Registry> + Sync + Send>> = Vec::new();

        if let ConsoleLogSettings::Enabled { common_settings } = &self.console_log_settings {
            let env_filter_layer = env_filter_builder(
                common_settings.environment_variable,
                common_settings.default_level,
            );
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_filter(env_filter_layer)
                    .boxed(),
            );
        }

        if let FileLogSettings::Enabled {
            common_settings,
            file_log_dir,
            rotation_period,
        } = &self.file_log_settings
        {
            let env_filter_layer = env_filter_builder(
                common_settings.environment_variable,
                common_settings.default_level,
            );

            let file_appender = RollingFileAppender::builder()
                .rotation(rotation_period.clone())
                .filename_prefix(self.service_name)
                .filename_suffix(Self::FILE_LOG_SUFFIX)
                .build(file_log_dir)
                .context(InitRollingFileAppenderSnafu { file_log_dir })?;

            layers.push(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(file_appender)
                    .with_filter(env_filter_layer)
                    .boxed(),
            );
        }

        if !layers.is_empty() {
            tracing::subscriber::set_global_default(tracing_subscriber::registry().with(layers))
                .context(SetGlobalDefaultSubscriberSnafu)?;
        }

        Ok(self)
    }
}

/// Builds a [`Tracing`] instance subscriber by subscriber.
#[derive(Debug)]
pub struct TracingBuilder {
    service_name: &'static str,
    console_log_settings: ConsoleLogSettings,
    file_log_settings: FileLogSettings,
}

impl TracingBuilder {
    /// Enable the console output subscriber and set the default [`LevelFilter`], which is
    /// overridable through the given environment variable.
    pub fn with_console_output(mut self, settings: impl Into<ConsoleLogSettings>) -> Self {
        self.console_log_settings = settings.into();
        self
    }

    /// Enable the rolling JSON file subscriber.
    pub fn with_file_output(mut self, settings: impl Into<FileLogSettings>) -> Self {
        self.file_log_settings = settings.into();
        self
    }

    pub fn build(self) -> Tracing {
        Tracing {
            service_name: self.service_name,
            console_log_settings: self.console_log_settings,
            file_log_settings: self.file_log_settings,
        }
    }
}

/// Create an [`EnvFilter`] configured with the given environment variable and default [`Directive`].
fn env_filter_builder(env_var: &str, default_directive: impl Into<Directive>) -> EnvFilter {
    EnvFilter::builder()
        .with_env_var(env_var)
        .with_default_directive(default_directive.into())
        .from_env_lossy()
}

/// Telemetry options which can be passed to [`Tracing::pre_configured()`].
///
/// With the `clap` feature enabled, this struct can be flattened into CLI arguments.
#[cfg_attr(feature = "clap", derive(clap::Args))]
#[cfg_attr(feature = "clap", command(next_help_heading = "Telemetry Options"))]
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TelemetryOptions {
    /// Disable console logs.
    #[cfg_attr(feature = "clap", arg(long, env))]
    pub console_log_disabled: bool,

    /// Enable logging to files located in the specified DIRECTORY.
    #[cfg_attr(
        feature = "clap",
        arg(long, env, value_name = "DIRECTORY", group = "file_log")
    )]
    pub file_log_directory: Option<PathBuf>,

    /// Time PERIOD after which log files are rolled over.
    #[cfg_attr(
        feature = "clap",
        arg(long, env, value_name = "PERIOD", requires = "file_log")
    )]
    pub file_log_rotation_period: Option<RotationPeriod>,
}

/// Supported periods when the log file is rolled over.
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[derive(Clone, Debug, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "PascalCase")]
pub enum RotationPeriod {
    Minutely,
    Hourly,
    Daily,

    #[default]
    Never,
}

impl From<RotationPeriod> for Rotation {
    fn from(value: RotationPeriod) -> Self {
        match value {
            RotationPeriod::Minutely => Self::MINUTELY,
            RotationPeriod::Hourly => Self::HOURLY,
            RotationPeriod::Daily => Self::DAILY,
            RotationPeriod::Never => Self::NEVER,
        }
    }
}
