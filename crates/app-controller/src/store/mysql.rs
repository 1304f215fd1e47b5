use async_trait::async_trait;
use snafu::ResultExt;
use sqlx::{
    MySqlPool,
    mysql::{MySqlConnectOptions, MySqlPoolOptions},
};
use tracing::instrument;

use super::{
    ConnectSnafu, DbTenant, InsertOutcome, InvalidRowIdSnafu, LookupSnafu, NewTenant,
    RemoveSnafu, Result, TenantKey, TenantRecord, TenantStore, insert_failed, migrations,
};
use crate::config::DatabaseConfig;

/// A [`TenantStore`] persisting tenants in MySQL.
#[derive(Clone, Debug)]
pub struct MySqlTenantStore {
    pool: MySqlPool,
}

impl MySqlTenantStore {
    /// Opens a pool to the database named in `config`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(connect_options(config))
            .await
            .context(ConnectSnafu)?;

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Applies all pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        migrations::run(&migrations::MYSQL_MIGRATOR, &self.pool).await
    }
}

fn connect_options(config: &DatabaseConfig) -> MySqlConnectOptions {
    let options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .database(&config.name);

    match &config.password {
        Some(password) => options.password(password),
        None => options,
    }
}

#[async_trait]
impl TenantStore for MySqlTenantStore {
    #[instrument(skip(self, key), fields(tenant = %key))]
    async fn find(&self, key: &TenantKey) -> Result<Option<TenantRecord>> {
        let row = sqlx::query_as::<_, DbTenant>(
            "SELECT id, name, email, space FROM users WHERE natural_key = ?",
        )
        .bind(key.to_column_value())
        .fetch_optional(&self.pool)
        .await
        .context(LookupSnafu { key: key.clone() })?;

        Ok(row.map(TenantRecord::from))
    }

    #[instrument(skip(self, tenant), fields(tenant = %tenant.key, namespace = %tenant.namespace))]
    async fn insert(&self, tenant: &NewTenant) -> Result<InsertOutcome> {
        let insert = sqlx::query(
            "INSERT INTO users (natural_key, name, email, space) VALUES (?, ?, ?, ?)",
        )
        .bind(tenant.key.to_column_value())
        .bind(&tenant.name)
        .bind(&tenant.email)
        .bind(&tenant.namespace)
        .execute(&self.pool)
        .await;

        match insert {
            Ok(result) => Ok(InsertOutcome::Inserted(TenantRecord {
                id: i64::try_from(result.last_insert_id()).context(InvalidRowIdSnafu {
                    key: tenant.key.clone(),
                })?,
                name: tenant.name.clone(),
                email: tenant.email.clone(),
                namespace: tenant.namespace.clone(),
            })),
            Err(err) => insert_failed(err, tenant),
        }
    }

    #[instrument(skip(self, key), fields(tenant = %key))]
    async fn remove(&self, key: &TenantKey) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE natural_key = ?")
            .bind(key.to_column_value())
            .execute(&self.pool)
            .await
            .context(RemoveSnafu { key: key.clone() })?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseType;

    #[test]
    fn options_follow_config() {
        let config = DatabaseConfig {
            type_: DatabaseType::Mysql,
            host: "db.example.com".to_owned(),
            port: 3307,
            user: "controller".to_owned(),
            password: Some("secret".to_owned()),
            name: "tenants".to_owned(),
            ..DatabaseConfig::default()
        };

        let options = connect_options(&config);

        assert_eq!(options.get_host(), "db.example.com");
        assert_eq!(options.get_port(), 3307);
        assert_eq!(options.get_username(), "controller");
        assert_eq!(options.get_database(), Some("tenants"));
    }
}
