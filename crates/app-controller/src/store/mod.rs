//! Persistence of the tenant to namespace mapping.
//!
//! The [`TenantStore`] trait is the storage capability the [`crate::tenant::TenantDirectory`]
//! consumes. [`sqlite::SqliteTenantStore`] and [`mysql::MySqlTenantStore`] implement it on top
//! of [`sqlx`], [`open`] picks one according to the configuration.

use std::{fmt::Display, sync::Arc};

use async_trait::async_trait;
use snafu::{ResultExt, Snafu};
use tracing::debug;

use crate::{
    config::{DatabaseConfig, DatabaseType},
    error::{ControllerError, ErrorKind},
    identity::Identity,
};

pub mod migrations;
pub mod mysql;
pub mod sqlite;

/// Name of the column carrying the unique natural key. Both backends name it in their unique
/// violation messages, the namespace index does not.
const NATURAL_KEY_COLUMN: &str = "natural_key";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu, strum::EnumDiscriminants)]
#[strum_discriminants(derive(strum::IntoStaticStr))]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to connect to the tenant database"))]
    Connect { source: sqlx::Error },

    #[snafu(display("failed to apply tenant database migrations"))]
    Migrate { source: sqlx::migrate::MigrateError },

    #[snafu(display("failed to look up tenant {key}"))]
    Lookup { source: sqlx::Error, key: TenantKey },

    #[snafu(display("failed to insert tenant {key}"))]
    Insert { source: sqlx::Error, key: TenantKey },

    #[snafu(display("failed to remove tenant {key}"))]
    Remove { source: sqlx::Error, key: TenantKey },

    #[snafu(display("namespace {namespace:?} is already assigned to another tenant"))]
    NamespaceTaken { namespace: String },

    #[snafu(display("database assigned an out of range id to tenant {key}"))]
    InvalidRowId {
        source: std::num::TryFromIntError,
        key: TenantKey,
    },
}

impl ControllerError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NamespaceTaken { .. } => ErrorKind::Conflict,
            _ => ErrorKind::Upstream,
        }
    }

    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

/// The natural key identifying a tenant.
///
/// Source-control logins are keyed by nickname because they do not guarantee a stable email
/// address. All other identities are keyed by email.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TenantKey {
    Name(String),
    Email(String),
}

impl TenantKey {
    pub fn for_identity(identity: &Identity) -> Self {
        if identity.subject_source.is_source_control() {
            Self::Name(identity.nickname.clone())
        } else {
            Self::Email(identity.email.clone())
        }
    }

    /// The value stored in the unique `natural_key` column.
    ///
    /// The key type is part of the value, a nickname never matches an email.
    pub fn to_column_value(&self) -> String {
        match self {
            Self::Name(name) => format!("name:{name}"),
            Self::Email(email) => format!("email:{email}"),
        }
    }
}

impl Display for TenantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(name) => write!(f, "with name {name:?}"),
            Self::Email(email) => write!(f, "with email {email:?}"),
        }
    }
}

/// A persisted tenant. The namespace is written once and never reassigned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantRecord {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub namespace: String,
}

/// A row of the `users` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct DbTenant {
    id: i64,
    name: String,
    email: String,
    space: String,
}

impl From<DbTenant> for TenantRecord {
    fn from(row: DbTenant) -> Self {
        Self {
            id: row.id,
            name: row.name,
            email: row.email,
            namespace: row.space,
        }
    }
}

/// A tenant about to be persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTenant {
    pub key: TenantKey,
    pub name: String,
    pub email: String,
    pub namespace: String,
}

impl NewTenant {
    pub fn for_identity(identity: &Identity, namespace: impl Into<String>) -> Self {
        Self {
            key: TenantKey::for_identity(identity),
            name: identity.nickname.clone(),
            email: identity.email.clone(),
            namespace: namespace.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(TenantRecord),

    /// Another tenant with the same natural key was inserted first.
    Conflict,
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn find(&self, key: &TenantKey) -> Result<Option<TenantRecord>>;

    /// Inserts the tenant unless one with the same natural key exists.
    async fn insert(&self, tenant: &NewTenant) -> Result<InsertOutcome>;

    /// Removes the tenant, returns whether it existed.
    async fn remove(&self, key: &TenantKey) -> Result<bool>;
}

/// Connects to the configured database and applies pending migrations.
pub async fn open(config: &DatabaseConfig) -> Result<Arc<dyn TenantStore>> {
    match config.type_ {
        DatabaseType::Sqlite => {
            let store = sqlite::SqliteTenantStore::connect(&config.src, config.max_connections)
                .await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        DatabaseType::Mysql => {
            let store = mysql::MySqlTenantStore::connect(config).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum UniqueViolation {
    NaturalKey,
    Namespace,
}

impl UniqueViolation {
    /// Neither backend reports the violated constraint in a structured way, only the message
    /// names it.
    fn from_message(message: &str) -> Self {
        if message.contains(NATURAL_KEY_COLUMN) {
            Self::NaturalKey
        } else {
            Self::Namespace
        }
    }
}

/// Maps a failed insert of `tenant` to its outcome.
fn insert_failed(err: sqlx::Error, tenant: &NewTenant) -> Result<InsertOutcome> {
    let violation = match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            Some(UniqueViolation::from_message(db_err.message()))
        }
        _ => None,
    };

    match violation {
        Some(UniqueViolation::NaturalKey) => {
            debug!("tenant was inserted concurrently");
            Ok(InsertOutcome::Conflict)
        }
        Some(UniqueViolation::Namespace) => NamespaceTakenSnafu {
            namespace: tenant.namespace.clone(),
        }
        .fail(),
        None => Err(err).context(InsertSnafu {
            key: tenant.key.clone(),
        }),
    }
}
