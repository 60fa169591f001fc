//! Core data models used throughout kopi-rag.
//!
//! These types represent the records, documents, and retrieval results that
//! flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};

/// One row of the source CSV, before cleaning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceRecord {
    /// `Kategori Tempat` column.
    pub category: String,
    /// `Kota` column.
    pub location: String,
    /// `Akun Instagram` column.
    pub source: String,
    /// `deskripsi` column.
    pub description: String,
    /// `opini` column.
    pub opinion: String,
}

/// Metadata stored next to every document in the vector index.
///
/// Serialized with the original column vocabulary (`kategori`, `lokasi`)
/// so the persisted JSON stays readable alongside the source data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub id: i64,
    #[serde(rename = "kategori")]
    pub category: String,
    #[serde(rename = "lokasi")]
    pub location: String,
    pub source: String,
}

/// Normalized unit stored in the vector index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Dense sequential id, starting at 1 in source row order.
    pub id: i64,
    /// Fixed-template text; see [`crate::normalize::build_content`].
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// A document returned by the retriever.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedResult {
    pub document: Document,
    /// Distance to the query (lower is better). `None` under the
    /// diversity strategy, which does not expose scores.
    pub score: Option<f32>,
}

impl RetrievedResult {
    /// Source account name used for citations, `"Unknown"` when blank.
    pub fn source_name(&self) -> &str {
        non_blank_or_unknown(&self.document.metadata.source)
    }

    /// Location used for citations, `"Unknown"` when blank.
    pub fn location(&self) -> &str {
        non_blank_or_unknown(&self.document.metadata.location)
    }
}

fn non_blank_or_unknown(s: &str) -> &str {
    if s.trim().is_empty() {
        "Unknown"
    } else {
        s
    }
}
