//! In-memory [`VectorIndex`] implementation for tests.
//!
//! Uses a `Vec` behind `std::sync::RwLock`. Search is brute-force cosine
//! similarity over every stored vector.

use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::Document;

use super::{rank_by_similarity, ScoredDocument, VectorIndex};

/// In-memory index.
pub struct InMemoryIndex {
    entries: RwLock<Vec<(Document, Vec<f32>)>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn add(&self, documents: &[Document], vectors: &[Vec<f32>]) -> Result<()> {
        if documents.len() != vectors.len() {
            bail!(
                "document/vector count mismatch: {} documents, {} vectors",
                documents.len(),
                vectors.len()
            );
        }
        let mut entries = self.entries.write().unwrap();
        for (doc, vec) in documents.iter().zip(vectors.iter()) {
            entries.push((doc.clone(), vec.clone()));
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().unwrap().len())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().unwrap().clear();
        Ok(())
    }

    async fn nearest(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredDocument>> {
        let snapshot = self.entries.read().unwrap().clone();
        Ok(rank_by_similarity(snapshot, query_vec, k))
    }

    async fn documents(&self) -> Result<Vec<Document>> {
        Ok(self
            .entries
            .read()
            .unwrap()
            .iter()
            .map(|(d, _)| d.clone())
            .collect())
    }
}
