//! Store bootstrap: connection options, ledger schema, and schema checks.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Value stored in `PRAGMA user_version` once `schema.sql` has been applied.
pub const SCHEMA_VERSION: i64 = 1;

/// Every table the repository reads or writes.
pub const LEDGER_TABLES: [&str; 7] = [
    "fills",
    "resolutions",
    "wallet_aliases",
    "ledger_lots",
    "positions",
    "rebuild_runs",
    "unit_failures",
];

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error("cannot create database directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("database schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: i64, supported: i64 },
    #[error("ledger tables missing after migration: {}", .0.join(", "))]
    MissingTables(Vec<String>),
}

/// Open (creating if needed) the ledger store at `db_path` and bring its schema up to date.
///
/// # Errors
/// Fails when the directory or file cannot be created, when the store was
/// written by a newer schema version, or when a ledger table is absent
/// after the schema ran.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, DbInitError> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| DbInitError::Directory {
                path: parent.display().to_string(),
                source,
            })?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;

    let version = run_migrations(&pool).await?;
    info!(path = db_path, schema_version = version, "Ledger store ready");
    Ok(pool)
}

/// Apply `schema.sql` when the store is behind, then verify the ledger tables.
///
/// Returns the schema version the store is at afterwards.
async fn run_migrations(pool: &SqlitePool) -> Result<i64, DbInitError> {
    let found = schema_version(pool).await?;
    if found > SCHEMA_VERSION {
        return Err(DbInitError::UnsupportedVersion {
            found,
            supported: SCHEMA_VERSION,
        });
    }

    if found < SCHEMA_VERSION {
        info!(from = found, to = SCHEMA_VERSION, "Applying ledger schema");
        let mut tx = pool.begin().await?;
        for statement in include_str!("schema.sql")
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        // PRAGMA does not accept bound parameters.
        sqlx::query(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    } else {
        debug!(schema_version = found, "Ledger schema up to date");
    }

    verify_tables(pool).await?;
    Ok(SCHEMA_VERSION)
}

async fn schema_version(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    Ok(version)
}

async fn verify_tables(pool: &SqlitePool) -> Result<(), DbInitError> {
    let present: Vec<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(pool)
            .await?;

    let missing: Vec<String> = LEDGER_TABLES
        .iter()
        .filter(|table| !present.iter().any(|(name,)| name.as_str() == **table))
        .map(|table| table.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(DbInitError::MissingTables(missing))
    }
}
