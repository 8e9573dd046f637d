//! # Database Migration System
//!
//! Applies the SQL files under `migrations/` in version order, recording each
//! applied version in `hostflow_schema_migrations`.
//!
//! ## Concurrency Control
//!
//! Several workers may start at once against the same database. The whole
//! run holds a session-level advisory lock on one pooled connection, so only
//! one process applies migrations and the others wait, then find nothing
//! outstanding:
//!
//! ```sql
//! SELECT pg_advisory_lock(7311590412683301)
//! ```
//!
//! ## Migration Discovery
//!
//! Files follow `YYYYMMDDHHMMSS_description.sql`. The directory is
//! `HOSTFLOW_MIGRATIONS_DIR`, `./migrations`, or the crate's own `migrations/`.

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, Row};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

const MIGRATION_LOCK_KEY: i64 = 7_311_590_412_683_301;

#[derive(Debug, Clone)]
pub struct Migration {
    /// Version timestamp (YYYYMMDDHHMMSS)
    pub version: String,
    pub name: String,
    pub path: PathBuf,
}

pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Run all outstanding migrations under the advisory lock
    pub async fn run_all(pool: &PgPool) -> Result<(), sqlx::Error> {
        let mut conn = pool.acquire().await?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        let result = Self::run_outstanding(&mut conn).await;

        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        result
    }

    async fn run_outstanding(conn: &mut PoolConnection<Postgres>) -> Result<(), sqlx::Error> {
        Self::ensure_migration_table(conn).await?;

        let migrations = Self::discover_migrations()?;
        let applied = Self::get_applied_migrations(conn).await?;

        for migration in migrations.values() {
            if applied.contains(&migration.version) {
                debug!(version = %migration.version, "Migration already applied");
                continue;
            }
            info!(
                version = %migration.version,
                name = %migration.name,
                "Applying migration"
            );
            let sql = fs::read_to_string(&migration.path).map_err(sqlx::Error::Io)?;
            sqlx::raw_sql(&sql).execute(&mut **conn).await?;
            Self::record_migration(conn, &migration.version).await?;
        }

        Ok(())
    }

    fn migrations_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("HOSTFLOW_MIGRATIONS_DIR") {
            return PathBuf::from(dir);
        }
        let local = PathBuf::from("migrations");
        if local.is_dir() {
            return local;
        }
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations")
    }

    /// Discover migration files, ordered by version
    pub fn discover_migrations() -> Result<BTreeMap<String, Migration>, sqlx::Error> {
        let migrations_dir = Self::migrations_dir();
        let mut migrations = BTreeMap::new();

        if !migrations_dir.exists() {
            return Ok(migrations);
        }

        for entry in fs::read_dir(&migrations_dir).map_err(sqlx::Error::Io)? {
            let path = entry.map_err(sqlx::Error::Io)?.path();

            if !path.is_file() || path.extension().map_or(true, |ext| ext != "sql") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some((version, name)) = Self::parse_migration_filename(stem) {
                migrations.insert(
                    version.clone(),
                    Migration {
                        version,
                        name,
                        path: path.clone(),
                    },
                );
            }
        }

        Ok(migrations)
    }

    fn parse_migration_filename(filename: &str) -> Option<(String, String)> {
        if filename.len() < 15 {
            return None;
        }

        let (version_part, name_part) = filename.split_at(14);
        if !version_part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let name = name_part
            .strip_prefix('_')
            .unwrap_or(name_part)
            .replace('_', " ");
        Some((version_part.to_string(), name))
    }

    async fn ensure_migration_table(
        conn: &mut PoolConnection<Postgres>,
    ) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS hostflow_schema_migrations (
                version VARCHAR(14) PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(&mut **conn)
        .await?;
        Ok(())
    }

    async fn get_applied_migrations(
        conn: &mut PoolConnection<Postgres>,
    ) -> Result<HashSet<String>, sqlx::Error> {
        let rows = sqlx::query("SELECT version FROM hostflow_schema_migrations")
            .fetch_all(&mut **conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("version"))
            .collect())
    }

    async fn record_migration(
        conn: &mut PoolConnection<Postgres>,
        version: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO hostflow_schema_migrations (version) VALUES ($1)")
            .bind(version)
            .execute(&mut **conn)
            .await?;
        Ok(())
    }
}
