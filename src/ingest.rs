//! CSV ingestion pipeline.
//!
//! Coordinates the ingest flow: CSV → records → cleaned documents →
//! passage embeddings → vector index. The index is wiped first unless the
//! caller asks to append; ingestion itself never deduplicates.

use anyhow::{Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};

use kopi_rag_core::embedding::EmbeddingService;
use kopi_rag_core::models::{Document, SourceRecord};
use kopi_rag_core::normalize::{content_fingerprint, records_to_documents};
use kopi_rag_core::store::VectorIndex;

use crate::config::Config;
use crate::embedding;
use crate::sqlite_store::{IndexInfo, SqliteIndex};
use crate::{db, migrate};

/// Columns the source CSV must provide.
pub const REQUIRED_COLUMNS: [&str; 5] = [
    "Kota",
    "Akun Instagram",
    "Kategori Tempat",
    "deskripsi",
    "opini",
];

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("source file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error(
        "missing required columns: {}. Available columns: {}",
        .missing.join(", "),
        .available.join(", ")
    )]
    MissingColumns {
        missing: Vec<String>,
        available: Vec<String>,
    },
}

/// Summary of one ingestion run.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionReport {
    pub documents: usize,
    pub dims: usize,
    pub model: String,
    /// SHA-256 over the ingested contents in order.
    pub fingerprint: String,
}

/// Read every row of the CSV at `path`.
pub fn read_records(path: &Path) -> Result<Vec<SourceRecord>> {
    if !path.is_file() {
        return Err(IngestError::MissingFile(path.to_path_buf()).into());
    }
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
    read_records_from(file).with_context(|| format!("Failed to read CSV: {}", path.display()))
}

/// Parse records from any CSV source. Missing cells read as `""`.
pub fn read_records_from<R: Read>(reader: R) -> Result<Vec<SourceRecord>> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers = rdr.headers()?.clone();
    let available: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    let position = |name: &str| available.iter().position(|h| h == name);

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| position(c).is_none())
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(IngestError::MissingColumns {
            missing,
            available: available.clone(),
        }
        .into());
    }

    // Every lookup below succeeds: all required columns were found above.
    let [kota, akun, kategori, deskripsi, opini] =
        REQUIRED_COLUMNS.map(|c| position(c).unwrap_or_default());

    let mut records = Vec::new();
    for row in rdr.records() {
        let row = row?;
        let cell = |i: usize| row.get(i).unwrap_or("").to_string();
        records.push(SourceRecord {
            category: cell(kategori),
            location: cell(kota),
            source: cell(akun),
            description: cell(deskripsi),
            opinion: cell(opini),
        });
    }
    Ok(records)
}

/// Embed every document as a passage, `batch_size` at a time.
pub async fn embed_all(
    embedder: &EmbeddingService,
    documents: &[Document],
) -> Result<Vec<Vec<f32>>> {
    let total = documents.len();
    let mut vectors = Vec::with_capacity(total);

    for batch in documents.chunks(embedder.batch_size()) {
        let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
        vectors.extend(embedder.embed_documents(&texts).await?);
        tracing::debug!(embedded = vectors.len(), total, "embedded batch");
    }
    Ok(vectors)
}

/// Embed `documents` and append them to `index`.
///
/// Nothing is written until every document has been embedded.
pub async fn index_documents(
    index: &dyn VectorIndex,
    embedder: &EmbeddingService,
    documents: &[Document],
) -> Result<()> {
    let vectors = embed_all(embedder, documents).await?;
    index.add(documents, &vectors).await
}

/// Ingest the CSV at `csv_path` into `index` without wiping it.
pub async fn ingest_csv(
    index: &dyn VectorIndex,
    embedder: &EmbeddingService,
    csv_path: &Path,
) -> Result<IngestionReport> {
    let records = read_records(csv_path)?;
    tracing::info!(path = %csv_path.display(), rows = records.len(), "loaded CSV");
    ingest_records(index, embedder, &records).await
}

/// Normalize `records` into documents, embed, and append them to `index`.
pub async fn ingest_records(
    index: &dyn VectorIndex,
    embedder: &EmbeddingService,
    records: &[SourceRecord],
) -> Result<IngestionReport> {
    let documents = records_to_documents(records);
    index_documents(index, embedder, &documents).await?;

    let report = IngestionReport {
        documents: documents.len(),
        dims: embedder.dims(),
        model: embedder.model_name().to_string(),
        fingerprint: content_fingerprint(&documents),
    };
    tracing::info!(
        documents = report.documents,
        dims = report.dims,
        model = %report.model,
        "ingestion complete"
    );
    Ok(report)
}

/// Outcome of [`replace_index`].
#[derive(Debug, Clone, PartialEq)]
pub struct CommitSummary {
    pub report: IngestionReport,
    /// Rows in the index afterwards.
    pub total: usize,
    /// Rows wiped before the insert.
    pub removed: usize,
}

/// Embed `records`, then wipe (unless `append`) and store them in a single
/// transaction together with the index info.
///
/// A failure anywhere leaves the previous index and its info untouched.
pub async fn replace_index(
    index: &SqliteIndex,
    embedder: &EmbeddingService,
    records: &[SourceRecord],
    append: bool,
) -> Result<CommitSummary> {
    let documents = records_to_documents(records);
    let vectors = embed_all(embedder, &documents).await?;

    let mut all_docs = if append {
        let existing = index.read_info().await?;
        if let Some(dims) = existing.dims {
            if dims != embedder.dims() {
                anyhow::bail!(
                    "Cannot append: index holds {}-dim vectors but the embedding model produces {}",
                    dims,
                    embedder.dims()
                );
            }
        }
        index.documents().await?
    } else {
        Vec::new()
    };
    let removed = if append { 0 } else { index.count().await? };
    all_docs.extend(documents.iter().cloned());

    let info = IndexInfo {
        model: Some(embedder.model_name().to_string()),
        dims: Some(embedder.dims()),
        ingested_at: Some(chrono::Utc::now().to_rfc3339()),
        fingerprint: Some(content_fingerprint(&all_docs)),
    };
    index
        .commit_ingest(&documents, &vectors, &info, !append)
        .await?;
    if !append {
        tracing::info!(removed, "wiped vector index");
    }

    let report = IngestionReport {
        documents: documents.len(),
        dims: embedder.dims(),
        model: embedder.model_name().to_string(),
        fingerprint: content_fingerprint(&documents),
    };
    tracing::info!(
        documents = report.documents,
        dims = report.dims,
        model = %report.model,
        "ingestion complete"
    );
    Ok(CommitSummary {
        report,
        total: all_docs.len(),
        removed,
    })
}

/// `kopi ingest`: wipe (unless `append`), ingest, record index info.
///
/// The CSV is read and validated, and every document embedded, before the
/// index is touched.
pub async fn run_ingest(config: &Config, csv: Option<PathBuf>, append: bool) -> Result<()> {
    let csv_path = csv.unwrap_or_else(|| config.paths.csv.clone());
    let records = read_records(&csv_path)?;
    tracing::info!(path = %csv_path.display(), rows = records.len(), "loaded CSV");

    let embedder = embedding::create_service(&config.embedding).await?;

    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;
    let index = SqliteIndex::new(pool);

    let summary = replace_index(&index, &embedder, &records, append).await?;
    let report = &summary.report;

    println!("ingest {}", csv_path.display());
    println!("  documents: {}", report.documents);
    println!("  total in index: {}", summary.total);
    println!("  model: {} ({} dims)", report.model, report.dims);
    println!("  fingerprint: {}", report.fingerprint);
    println!("  index: {}", config.paths.vector_store.display());
    println!("ok");

    index.pool().close().await;
    Ok(())
}
