//! Subscriber settings used by [`Tracing`][super::Tracing].

use std::path::PathBuf;

use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::Rotation;

/// Settings shared by every subscriber.
#[derive(Debug, PartialEq, Eq)]
pub struct Settings {
    /// The environment variable which can override the default level filter.
    pub environment_variable: &'static str,

    /// The level filter used when the environment variable is unset or invalid.
    pub default_level: LevelFilter,
}

/// Settings of the console (stdout) subscriber.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum ConsoleLogSettings {
    #[default]
    Disabled,
    Enabled { common_settings: Settings },
}

impl ConsoleLogSettings {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }
}

impl From<(&'static str, LevelFilter)> for ConsoleLogSettings {
    fn from((environment_variable, default_level): (&'static str, LevelFilter)) -> Self {
        Self::Enabled {
            common_settings: Settings {
                environment_variable,
                default_level,
            },
        }
    }
}

impl From<(&'static str, LevelFilter, bool)> for ConsoleLogSettings {
    fn from(
        (environment_variable, default_level, enabled): (&'static str, LevelFilter, bool),
    ) -> Self {
        if enabled {
            (environment_variable, default_level).into()
        } else {
            Self::Disabled
        }
    }
}

/// Settings of the rolling file subscriber, which writes one JSON object per line.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum FileLogSettings {
    #[default]
    Disabled,
    Enabled {
        common_settings: Settings,

        /// Directory the log files are written to. It is created if missing.
        file_log_dir: PathBuf,

        /// How often the current log file is rolled over.
        rotation_period: Rotation,
    },
}

impl FileLogSettings {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }
}

impl<T> From<Option<T>> for FileLogSettings
where
    T: Into<Self>,
{
    fn from(settings: Option<T>) -> Self {
        settings.map_or_else(Self::default, Into::into)
    }
}

impl From<(&'static str, LevelFilter, PathBuf, Rotation)> for FileLogSettings {
    fn from(
        (environment_variable, default_level, file_log_dir, rotation_period): (
            &'static str,
            LevelFilter,
            PathBuf,
            Rotation,
        ),
    ) -> Self {
        Self::Enabled {
            common_settings: Settings {
                environment_variable,
                default_level,
            },
            file_log_dir,
            rotation_period,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn console_settings_toggle(#[case] enabled: bool) {
        let settings = ConsoleLogSettings::from(("CONSOLE_LOG_LEVEL", LevelFilter::INFO, enabled));
        assert_eq!(settings.is_enabled(), enabled);
    }

    #[test]
    fn file_settings_from_none_is_disabled() {
        let settings =
            FileLogSettings::from(None::<(&'static str, LevelFilter, PathBuf, Rotation)>);
        assert_eq!(settings, FileLogSettings::Disabled);
    }

    #[test]
    fn file_settings_from_tuple() {
        let settings = FileLogSettings::from((
            "FILE_LOG_LEVEL",
            LevelFilter::DEBUG,
            PathBuf::from("/var/log/pf9/app-controller"),
            Rotation::HOURLY,
        ));

        assert_eq!(
            settings,
            FileLogSettings::Enabled {
                common_settings: Settings {
                    environment_variable: "FILE_LOG_LEVEL",
                    default_level: LevelFilter::DEBUG,
                },
                file_log_dir: PathBuf::from("/var/log/pf9/app-controller"),
                rotation_period: Rotation::HOURLY,
            }
        );
    }
}
