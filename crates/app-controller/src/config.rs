//! The YAML configuration file of the app-controller.
//!
//! ```yaml
//! kubeconfig:
//!   file: /etc/pf9/app-controller/kubeconfig
//! db:
//!   type: sqlite
//!   src: sqlite:///var/lib/pf9/app-controller/app-controller.db?mode=rwc
//!   max-connections: 5
//! auth:
//!   audience: my-client-id
//!   jwks-file: /etc/pf9/app-controller/jwks.json
//!   algorithms: [RS256]
//! constraints:
//!   max-app: 7
//!   max-scale: 1
//!   strict-pull-secrets: false
//! server:
//!   bind-address: 0.0.0.0:6112
//!   request-timeout: 30s
//! ```
//!
//! A MySQL database is configured by its connection parameters instead of `src`:
//!
//! ```yaml
//! db:
//!   type: mysql
//!   host: mysql.example.com
//!   port: 3306
//!   user: app-controller
//!   password: changeme
//!   name: app_controller
//! ```

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Deserializer};
use snafu::{ResultExt, Snafu, ensure};

use crate::{quota::DEFAULT_MAX_WORKLOADS, workload::DEFAULT_MAX_SCALE};

pub const DEFAULT_CONFIG_FILE: &str = "/etc/pf9/app-controller/config.yaml";
pub const DEFAULT_DB_SRC: &str = "sqlite://app-controller.db?mode=rwc";
pub const DEFAULT_PORT: u16 = 6112;

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_DB_HOST: &str = "localhost";
const DEFAULT_MYSQL_PORT: u16 = 3306;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read config file {path:?}"))]
    ReadConfig {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse config file {path:?}"))]
    ParseConfig {
        source: serde_yaml::Error,
        path: PathBuf,
    },

    #[snafu(display("invalid configuration: {field} {reason}"))]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub kubeconfig: KubeconfigConfig,

    #[serde(default)]
    pub db: DatabaseConfig,

    pub auth: AuthConfig,

    #[serde(default)]
    pub constraints: Constraints,

    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct KubeconfigConfig {
    /// Inferred from the environment if unset.
    pub file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    #[default]
    #[serde(alias = "sqlite3")]
    Sqlite,
    Mysql,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub type_: DatabaseType,

    /// Connection URL of a SQLite database.
    pub src: String,

    pub max_connections: u32,

    /// The remaining fields address a MySQL database.
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            type_: DatabaseType::default(),
            src: DEFAULT_DB_SRC.to_owned(),
            max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            host: DEFAULT_DB_HOST.to_owned(),
            port: DEFAULT_MYSQL_PORT,
            user: String::new(),
            password: None,
            name: String::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AuthConfig {
    /// The audience tokens must be issued for.
    pub audience: String,

    /// JSON Web Key Set with the keys tokens are signed with.
    pub jwks_file: PathBuf,

    #[serde(default = "AuthConfig::default_algorithms")]
    pub algorithms: Vec<Algorithm>,
}

impl AuthConfig {
    fn default_algorithms() -> Vec<Algorithm> {
        vec![Algorithm::RS256]
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct Constraints {
    /// Maximum number of workloads per tenant.
    pub max_app: usize,

    /// Maximum number of replicas per workload.
    pub max_scale: u32,

    /// Fail workload creation if its pull secret cannot be provisioned.
    pub strict_pull_secrets: bool,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            max_app: DEFAULT_MAX_WORKLOADS,
            max_scale: DEFAULT_MAX_SCALE,
            strict_pull_secrets: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,

    /// Deadline for handling a single request, e.g. `30s` or `2m`.
    #[serde(deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    humantime::parse_duration(&value).map_err(serde::de::Error::custom)
}

impl Config {
    /// Reads and validates the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).context(ReadConfigSnafu { path })?;
        let config: Self = serde_yaml::from_str(&content).context(ParseConfigSnafu { path })?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        ensure!(
            !self.auth.audience.is_empty(),
            InvalidValueSnafu {
                field: "auth.audience",
                reason: "must not be empty",
            }
        );
        ensure!(
            !self.auth.algorithms.is_empty(),
            InvalidValueSnafu {
                field: "auth.algorithms",
                reason: "must name at least one algorithm",
            }
        );
        ensure!(
            self.db.max_connections > 0,
            InvalidValueSnafu {
                field: "db.max-connections",
                reason: "must be at least 1",
            }
        );
        if self.db.type_ == DatabaseType::Mysql {
            ensure!(
                !self.db.host.is_empty(),
                InvalidValueSnafu {
                    field: "db.host",
                    reason: "must not be empty for a mysql database",
                }
            );
            ensure!(
                !self.db.name.is_empty(),
                InvalidValueSnafu {
                    field: "db.name",
                    reason: "must not be empty for a mysql database",
                }
            );
        }
        ensure!(
            self.constraints.max_app > 0,
            InvalidValueSnafu {
                field: "constraints.max-app",
                reason: "must be at least 1",
            }
        );
        ensure!(
            self.constraints.max_scale > 0,
            InvalidValueSnafu {
                field: "constraints.max-scale",
                reason: "must be at least 1",
            }
        );
        ensure!(
            !self.server.request_timeout.is_zero(),
            InvalidValueSnafu {
                field: "server.request-timeout",
                reason: "must be positive",
            }
        );

        Ok(())
    }
}
