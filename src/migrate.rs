use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the index directory and schema. Idempotent.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // One row per stored (document, vector) pair. `doc_id` is the
    // document's own id and is not unique: appends duplicate it.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            row_id INTEGER PRIMARY KEY AUTOINCREMENT,
            doc_id INTEGER NOT NULL,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Model, dims, and ingest time of the last ingestion
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_doc_id ON documents(doc_id)")
        .execute(pool)
        .await?;

    Ok(())
}
