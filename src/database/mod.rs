//! SQLite Database Module
//!
//! Stores sources, their lifecycle status and every derived index entity
//! (pages, sections, chunks, tables, datasets, dataset rows).
//!
//! Operations are grouped into extension traits implemented on [`Database`]:
//! [`SourceOps`] for the source registry and [`RulesIndexOps`] for the derived
//! index.

mod migrations;
mod models;
mod rules_index;
mod sources;

pub use migrations::run_migrations;
pub use models::*;
pub use rules_index::{IndexCounts, RulesIndexOps};
pub use sources::{IndexLease, SourceError, SourceOps, ABANDONED_RUN_MESSAGE};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// File name of the index database inside the data directory.
pub const DATABASE_FILE: &str = "rulebook_index.db";

/// Database connection pool
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    path: PathBuf,
}

impl Database {
    /// Open (or create) the database inside `data_dir` and run migrations.
    pub async fn new(data_dir: &Path) -> Result<Self, sqlx::Error> {
        Self::open(&data_dir.join(DATABASE_FILE)).await
    }

    /// Open (or create) the database at an explicit file path.
    pub async fn open(db_path: &Path) -> Result<Self, sqlx::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", db_path.display()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .connect_with(options)
            .await?;

        let db = Self {
            pool,
            path: db_path.to_path_buf(),
        };

        migrations::run_migrations(&db.pool).await?;

        Ok(db)
    }

    /// Get the underlying pool for direct queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
