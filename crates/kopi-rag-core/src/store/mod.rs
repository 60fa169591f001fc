//! Vector index abstraction for kopi-rag.
//!
//! The [`VectorIndex`] trait defines the storage operations needed by
//! ingestion and retrieval, enabling pluggable backends (SQLite in the
//! application crate, [`memory::InMemoryIndex`] for tests).
//!
//! Scores follow one convention everywhere: indexes rank by cosine
//! similarity (higher is better) and expose the distance
//! `2 - 2·cos` (lower is better) through [`ScoredDocument::distance`].

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::{cosine_similarity, distance_from_similarity};
use crate::models::Document;

/// A nearest-neighbour hit, carrying its stored vector so that re-ranking
/// strategies (MMR) need no second round-trip.
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub document: Document,
    pub vector: Vec<f32>,
    /// Cosine similarity to the query.
    pub similarity: f32,
}

impl ScoredDocument {
    /// Squared Euclidean distance between the unit vectors, lower is better.
    pub fn distance(&self) -> f32 {
        distance_from_similarity(self.similarity)
    }
}

/// Abstract persistent store of (document, embedding) pairs.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add`](VectorIndex::add) | Append documents with their vectors |
/// | [`count`](VectorIndex::count) | Number of stored documents |
/// | [`clear`](VectorIndex::clear) | Remove every document |
/// | [`nearest`](VectorIndex::nearest) | Top-k by cosine similarity |
/// | [`documents`](VectorIndex::documents) | All documents in insertion order |
///
/// `add` never deduplicates: adding the same documents twice stores them
/// twice. Callers wipe with `clear` before a re-ingest.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn add(&self, documents: &[Document], vectors: &[Vec<f32>]) -> Result<()>;

    async fn count(&self) -> Result<usize>;

    async fn clear(&self) -> Result<()>;

    /// Return at most `k` entries, most similar first.
    async fn nearest(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredDocument>>;

    async fn documents(&self) -> Result<Vec<Document>>;
}

/// Brute-force ranking shared by the index implementations.
///
/// Sorts by similarity (desc); ties keep insertion order.
pub fn rank_by_similarity(
    entries: Vec<(Document, Vec<f32>)>,
    query_vec: &[f32],
    k: usize,
) -> Vec<ScoredDocument> {
    let mut scored: Vec<ScoredDocument> = entries
        .into_iter()
        .map(|(document, vector)| {
            let similarity = cosine_similarity(query_vec, &vector);
            ScoredDocument {
                document,
                vector,
                similarity,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(k);
    scored
}
