//! SQLite-backed [`VectorIndex`] implementation.
//!
//! Documents and their vectors share one row in the `documents` table;
//! vectors are little-endian `f32` BLOBs. Search is brute-force cosine
//! similarity in Rust over every row, which is plenty for a few thousand
//! coffee shops.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqliteConnection, SqlitePool};

use kopi_rag_core::embedding::{blob_to_vec, vec_to_blob};
use kopi_rag_core::models::{Document, DocumentMetadata};
use kopi_rag_core::store::{rank_by_similarity, ScoredDocument, VectorIndex};

/// What the last ingestion recorded about the index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexInfo {
    pub model: Option<String>,
    pub dims: Option<usize>,
    pub ingested_at: Option<String>,
    pub fingerprint: Option<String>,
}

/// SQLite implementation of the [`VectorIndex`] trait.
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get_info(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM index_info WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn read_info(&self) -> Result<IndexInfo> {
        Ok(IndexInfo {
            model: self.get_info("model").await?,
            dims: self
                .get_info("dims")
                .await?
                .and_then(|d| d.parse::<usize>().ok()),
            ingested_at: self.get_info("ingested_at").await?,
            fingerprint: self.get_info("fingerprint").await?,
        })
    }

    /// Store a complete ingestion in one transaction: optionally wipe,
    /// insert every row, then record `info`. Nothing is visible to readers
    /// unless all of it succeeds.
    pub async fn commit_ingest(
        &self,
        documents: &[Document],
        vectors: &[Vec<f32>],
        info: &IndexInfo,
        wipe: bool,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if wipe {
            delete_all(&mut tx).await?;
        }
        insert_rows(&mut tx, documents, vectors).await?;
        upsert_info(&mut tx, info).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<(Document, Vec<f32>)>> {
        let rows = sqlx::query(
            "SELECT doc_id, content, metadata_json, embedding FROM documents ORDER BY row_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.get("doc_id");
            let metadata_json: String = row.get("metadata_json");
            let metadata: DocumentMetadata = serde_json::from_str(&metadata_json)
                .with_context(|| format!("Corrupt metadata for document {}", id))?;
            let blob: Vec<u8> = row.get("embedding");
            entries.push((
                Document {
                    id,
                    content: row.get("content"),
                    metadata,
                },
                blob_to_vec(&blob),
            ));
        }
        Ok(entries)
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn add(&self, documents: &[Document], vectors: &[Vec<f32>]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_rows(&mut tx, documents, vectors).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        delete_all(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn nearest(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredDocument>> {
        let entries = self.load_all().await?;
        Ok(rank_by_similarity(entries, query_vec, k))
    }

    async fn documents(&self) -> Result<Vec<Document>> {
        Ok(self.load_all().await?.into_iter().map(|(d, _)| d).collect())
    }
}

async fn insert_rows(
    conn: &mut SqliteConnection,
    documents: &[Document],
    vectors: &[Vec<f32>],
) -> Result<()> {
    if documents.len() != vectors.len() {
        anyhow::bail!(
            "document/vector count mismatch: {} documents, {} vectors",
            documents.len(),
            vectors.len()
        );
    }

    for (doc, vec) in documents.iter().zip(vectors.iter()) {
        let metadata_json = serde_json::to_string(&doc.metadata)?;
        sqlx::query(
            "INSERT INTO documents (doc_id, content, metadata_json, embedding)
             VALUES (?, ?, ?, ?)",
        )
        .bind(doc.id)
        .bind(&doc.content)
        .bind(&metadata_json)
        .bind(vec_to_blob(vec))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn delete_all(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("DELETE FROM documents")
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM index_info")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn set_info(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO index_info (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn upsert_info(conn: &mut SqliteConnection, info: &IndexInfo) -> Result<()> {
    if let Some(model) = &info.model {
        set_info(conn, "model", model).await?;
    }
    if let Some(dims) = info.dims {
        set_info(conn, "dims", &dims.to_string()).await?;
    }
    if let Some(ts) = &info.ingested_at {
        set_info(conn, "ingested_at", ts).await?;
    }
    if let Some(fp) = &info.fingerprint {
        set_info(conn, "fingerprint", fp).await?;
    }
    Ok(())
}
