//! SQLite connection handling for the vector index.
//!
//! The index is a directory (`paths.vector_store`) holding a single SQLite
//! file. Ingestion opens it with [`connect`], which creates whatever is
//! missing; serving opens it with [`open_existing`], which refuses to create
//! anything.

use anyhow::{bail, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::config::Config;

/// Hint appended to every "index not ready" error.
pub const INGEST_HINT: &str = "run `kopi ingest` first";

/// Open the index for writing, creating the directory and file if needed.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    std::fs::create_dir_all(&config.paths.vector_store)?;
    open(&config.index_db_path(), true).await
}

/// Open an index that must already exist.
pub async fn open_existing(config: &Config) -> Result<SqlitePool> {
    let dir = &config.paths.vector_store;
    if !dir.is_dir() {
        bail!(
            "Vector store not found at {}; {}",
            dir.display(),
            INGEST_HINT
        );
    }
    let db_path = config.index_db_path();
    if !db_path.is_file() {
        bail!(
            "Vector store database not found at {}; {}",
            db_path.display(),
            INGEST_HINT
        );
    }
    open(&db_path, false).await
}

async fn open(db_path: &Path, create: bool) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(create)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
