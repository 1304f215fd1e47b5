//! Schema migrations of the tenant database.
//!
//! The SQL files in `migrations/<backend>/` are embedded at build time. They are applied in
//! filename order, each at most once, and every applied migration is recorded in the
//! `_sqlx_migrations` ledger. Migrations are forward-only.
//!
//! Both backends carry the same versions, a schema change lands in both directories at once.

use std::ops::Deref;

use snafu::ResultExt;
use sqlx::{
    Acquire,
    migrate::{Migrate, Migrator},
};
use tracing::info;

use super::{MigrateSnafu, Result};

pub static SQLITE_MIGRATOR: Migrator = sqlx::migrate!("./migrations/sqlite");
pub static MYSQL_MIGRATOR: Migrator = sqlx::migrate!("./migrations/mysql");

/// Applies all pending migrations of `migrator`.
pub async fn run<'a, A>(migrator: &Migrator, connection: A) -> Result<()>
where
    A: Acquire<'a>,
    <A::Connection as Deref>::Target: Migrate,
{
    migrator.run(connection).await.context(MigrateSnafu)?;
    info!(
        migrations = migrator.iter().count(),
        "tenant database schema is up to date"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(migrator: &Migrator) -> Vec<i64> {
        migrator.iter().map(|migration| migration.version).collect()
    }

    #[test]
    fn migrations_are_sorted_by_version() {
        let versions = versions(&SQLITE_MIGRATOR);
        let mut sorted = versions.clone();
        sorted.sort_unstable();

        assert!(!versions.is_empty());
        assert_eq!(versions, sorted);
    }

    #[test]
    fn backends_share_versions() {
        assert_eq!(versions(&SQLITE_MIGRATOR), versions(&MYSQL_MIGRATOR));
    }

    #[tokio::test]
    async fn applying_twice_is_a_noop() {
        let pool = super::super::sqlite::tests::memory_pool().await;
        run(&SQLITE_MIGRATOR, &pool)
            .await
            .expect("first run must succeed");
        run(&SQLITE_MIGRATOR, &pool)
            .await
            .expect("second run must succeed");

        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
            .fetch_one(&pool)
            .await
            .expect("ledger must be readable");
        assert_eq!(
            applied,
            i64::try_from(SQLITE_MIGRATOR.iter().count()).expect("migration count fits into i64")
        );
    }
}
