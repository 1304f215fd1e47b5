use async_trait::async_trait;
use snafu::ResultExt;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use tracing::instrument;

use super::{
    ConnectSnafu, DbTenant, InsertOutcome, LookupSnafu, NewTenant, RemoveSnafu, Result, TenantKey,
    TenantRecord, TenantStore, insert_failed, migrations,
};

/// A [`TenantStore`] persisting tenants in SQLite.
///
/// Every operation is a single statement, no transaction is held open across cluster calls.
#[derive(Clone, Debug)]
pub struct SqliteTenantStore {
    pool: SqlitePool,
}

impl SqliteTenantStore {
    /// Opens a pool to the database at `src`, for example `sqlite://app-controller.db?mode=rwc`.
    pub async fn connect(src: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(src)
            .await
            .context(ConnectSnafu)?;

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Applies all pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        migrations::run(&migrations::SQLITE_MIGRATOR, &self.pool).await
    }
}

#[async_trait]
impl TenantStore for SqliteTenantStore {
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
                id: result.last_insert_rowid(),
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
pub(crate) mod tests {
    use super::*;

    pub async fn memory_pool() -> SqlitePool {
        // Every connection to `sqlite::memory:` opens its own database, so the pool must hold on
        // to exactly one.
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory database must open")
    }

    pub async fn memory_store() -> SqliteTenantStore {
        let store = SqliteTenantStore::from_pool(memory_pool().await);
        store.migrate().await.expect("migrations must apply");
        store
    }

    fn alice(namespace: &str) -> NewTenant {
        NewTenant {
            key: TenantKey::Name("alice".to_owned()),
            name: "alice".to_owned(),
            email: String::new(),
            namespace: namespace.to_owned(),
        }
    }

    #[tokio::test]
    async fn insert_then_find() {
        let store = memory_store().await;

        let outcome = store
            .insert(&alice("alice3k9x2a"))
            .await
            .expect("insert must succeed");

        let found = store
            .find(&TenantKey::Name("alice".to_owned()))
            .await
            .expect("lookup must succeed");
        assert_eq!(found.map(InsertOutcome::Inserted), Some(outcome));
    }

    #[tokio::test]
    async fn find_unknown_tenant() {
        let store = memory_store().await;

        let found = store
            .find(&TenantKey::Email("nobody@example.com".to_owned()))
            .await
            .expect("lookup must succeed");
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn second_insert_with_same_key_conflicts() {
        let store = memory_store().await;
        store
            .insert(&alice("alice3k9x2a"))
            .await
            .expect("insert must succeed");

        let outcome = store
            .insert(&alice("aliceq8w2pz"))
            .await
            .expect("conflict is not an error");
        assert_eq!(outcome, InsertOutcome::Conflict);

        let found = store
            .find(&TenantKey::Name("alice".to_owned()))
            .await
            .expect("lookup must succeed")
            .expect("tenant must exist");
        assert_eq!(found.namespace, "alice3k9x2a");
    }

    #[tokio::test]
    async fn namespace_cannot_be_shared() {
        let store = memory_store().await;
        store
            .insert(&alice("shared"))
            .await
            .expect("insert must succeed");

        let bob = NewTenant {
            key: TenantKey::Name("bob".to_owned()),
            name: "bob".to_owned(),
            email: String::new(),
            namespace: "shared".to_owned(),
        };
        let error = store.insert(&bob).await.expect_err("namespace is taken");
        assert!(matches!(error, super::super::Error::NamespaceTaken { .. }));
    }

    #[tokio::test]
    async fn remove_tenant() {
        let store = memory_store().await;
        let key = TenantKey::Name("alice".to_owned());
        store
            .insert(&alice("alice3k9x2a"))
            .await
            .expect("insert must succeed");

        assert!(store.remove(&key).await.expect("remove must succeed"));
        assert!(!store.remove(&key).await.expect("remove must succeed"));
        assert_eq!(store.find(&key).await.expect("lookup must succeed"), None);
    }
}
