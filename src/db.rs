//! SQLite database connection management.
//!
//! Every connection runs in WAL mode with foreign keys enforced, so a
//! media or review row can never outlive the row it points at. The
//! database file and its parent directories are created on first use.
//!
//! # Transactions
//!
//! Every mutating engine operation opens its transaction with
//! [`begin_write`], which issues `BEGIN IMMEDIATE`. The write lock is taken
//! before the first read, so two writers never both hold a read snapshot
//! and then race to upgrade it. A second writer queues on the busy timeout
//! and sees the first writer's committed counts once it gets the lock.
//! Read-only listings use plain pool queries.

use anyhow::Result;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Transaction;
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;

/// How long a writer waits for the database lock before giving up.
pub const WRITE_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Create a connection pool to the configured SQLite database.
///
/// # Errors
///
/// Returns an error if the database cannot be created or connected to.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(WRITE_LOCK_TIMEOUT)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Start a transaction that holds the database write lock from its first
/// statement.
pub async fn begin_write(pool: &SqlitePool) -> sqlx::Result<Transaction<'static, Sqlite>> {
    pool.begin_with("BEGIN IMMEDIATE").await
}
