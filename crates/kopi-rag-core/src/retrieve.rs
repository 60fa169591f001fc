//! Retrieval strategies and context rendering.
//!
//! The [`Retriever`] embeds a question in query mode, pulls a candidate
//! superset from a [`VectorIndex`], and narrows it with one of two
//! strategies:
//!
//! 1. **Diversity** ([`Strategy::Mmr`]): fetch `2k` nearest candidates and
//!    greedily pick up to `k` by maximal marginal relevance,
//!    `λ·sim(q, d) − (1 − λ)·max sim(d, s)` over already selected `s`.
//!    Scores are not exposed.
//! 2. **Threshold** ([`Strategy::Threshold`]): fetch `3k` nearest
//!    candidates, keep those whose distance is strictly below the
//!    threshold, return the best `k` in ascending distance order. Never
//!    pads with worse matches.
//!
//! [`format_context`] renders the results into the block the answer
//! generator consumes verbatim.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::embedding::{cosine_similarity, EmbeddingService};
use crate::models::RetrievedResult;
use crate::store::{ScoredDocument, VectorIndex};

/// Rendered when retrieval produced nothing.
pub const NO_DOCUMENTS_CONTEXT: &str = "Tidak ada dokumen relevan ditemukan.";

/// Candidate-pool multiplier for the diversity strategy.
pub const MMR_FETCH_FACTOR: usize = 2;
/// Candidate-pool multiplier for the threshold strategy.
pub const THRESHOLD_FETCH_FACTOR: usize = 3;

/// Document selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Mmr,
    Threshold,
}

impl FromStr for Strategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mmr" | "diversity" => Ok(Strategy::Mmr),
            "threshold" => Ok(Strategy::Threshold),
            other => bail!(
                "Unknown retrieval strategy: '{}'. Use mmr or threshold.",
                other
            ),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Mmr => write!(f, "mmr"),
            Strategy::Threshold => write!(f, "threshold"),
        }
    }
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    /// Distance cutoff for [`Strategy::Threshold`]; lower is stricter.
    pub score_threshold: f32,
    /// Relevance/diversity balance for [`Strategy::Mmr`], in `[0, 1]`.
    pub mmr_lambda: f32,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            score_threshold: 0.3,
            mmr_lambda: 0.5,
        }
    }
}

/// Query-side entry point over an index and an embedding service.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    embedder: EmbeddingService,
    params: RetrievalParams,
}

impl Retriever {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: EmbeddingService,
        params: RetrievalParams,
    ) -> Self {
        Self {
            index,
            embedder,
            params,
        }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Retrieve up to `k` documents for `query`.
    ///
    /// An empty result is a valid answer ("nothing relevant"), not an error.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        strategy: Strategy,
    ) -> Result<Vec<RetrievedResult>> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed_query(query).await?;

        let results = match strategy {
            Strategy::Mmr => {
                let candidates = self
                    .index
                    .nearest(&query_vec, k.saturating_mul(MMR_FETCH_FACTOR))
                    .await?;
                mmr_select(candidates, k, self.params.mmr_lambda)
                    .into_iter()
                    .map(|c| RetrievedResult {
                        document: c.document,
                        score: None,
                    })
                    .collect()
            }
            Strategy::Threshold => {
                let candidates = self
                    .index
                    .nearest(&query_vec, k.saturating_mul(THRESHOLD_FETCH_FACTOR))
                    .await?;
                threshold_select(candidates, k, self.params.score_threshold)
                    .into_iter()
                    .map(|c| {
                        let distance = c.distance();
                        RetrievedResult {
                            document: c.document,
                            score: Some(distance),
                        }
                    })
                    .collect()
            }
        };

        Ok(results)
    }
}

/// Select up to `k` diverse candidates by maximal marginal relevance.
///
/// The most similar candidate is always picked first. Candidates whose
/// content exactly matches an already selected one are never picked.
/// Output is in selection order.
pub fn mmr_select(
    candidates: Vec<ScoredDocument>,
    k: usize,
    lambda: f32,
) -> Vec<ScoredDocument> {
    if k == 0 || candidates.is_empty() {
        return Vec::new();
    }

    let selected = {
        let mut remaining: Vec<usize> = (0..candidates.len()).collect();
        let mut selected: Vec<usize> = Vec::with_capacity(k.min(candidates.len()));
        let mut seen_content: HashSet<&str> = HashSet::new();

        while selected.len() < k {
            remaining
                .retain(|&i| !seen_content.contains(candidates[i].document.content.as_str()));
            if remaining.is_empty() {
                break;
            }

            let mut best: Option<(usize, f32)> = None;
            for &i in &remaining {
                let score = if selected.is_empty() {
                    candidates[i].similarity
                } else {
                    let redundancy = selected
                        .iter()
                        .map(|&s| cosine_similarity(&candidates[i].vector, &candidates[s].vector))
                        .fold(f32::NEG_INFINITY, f32::max);
                    lambda * candidates[i].similarity - (1.0 - lambda) * redundancy
                };
                if best.map_or(true, |(_, b)| score > b) {
                    best = Some((i, score));
                }
            }

            let Some((pick, _)) = best else { break };
            selected.push(pick);
            seen_content.insert(candidates[pick].document.content.as_str());
            remaining.retain(|&i| i != pick);
        }
        selected
    };

    let mut slots: Vec<Option<ScoredDocument>> = candidates.into_iter().map(Some).collect();
    selected
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

/// Keep candidates with distance strictly below `threshold`, best `k`
/// first. Returns fewer than `k` when fewer qualify.
pub fn threshold_select(
    candidates: Vec<ScoredDocument>,
    k: usize,
    threshold: f32,
) -> Vec<ScoredDocument> {
    let mut passing: Vec<ScoredDocument> = candidates
        .into_iter()
        .filter(|c| c.distance() < threshold)
        .collect();
    passing.sort_by(|a, b| {
        a.distance()
            .partial_cmp(&b.distance())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    passing.truncate(k);
    passing
}

/// Render retrieved documents as a numbered context block.
pub fn format_context(results: &[RetrievedResult]) -> String {
    if results.is_empty() {
        return NO_DOCUMENTS_CONTEXT.to_string();
    }

    let mut context = String::from("Informasi Relevan:\n\n");
    for (i, result) in results.iter().enumerate() {
        context.push_str(&format!("--- Sumber {} ---\n", i + 1));
        context.push_str(&result.document.content);
        context.push_str(&format!("\n(Sumber: {})\n\n", result.source_name()));
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{normalize_l2, HashingBackend};
    use crate::models::{Document, DocumentMetadata, SourceRecord};
    use crate::normalize::records_to_documents;
    use crate::store::memory::InMemoryIndex;

    fn doc(id: i64, content: &str, source: &str) -> Document {
        Document {
            id,
            content: content.to_string(),
            metadata: DocumentMetadata {
                id,
                category: "Cafe".to_string(),
                location: "Sleman".to_string(),
                source: source.to_string(),
            },
        }
    }

    fn scored(id: i64, content: &str, vector: Vec<f32>, query: &[f32]) -> ScoredDocument {
        let vector = normalize_l2(vector);
        let similarity = cosine_similarity(query, &vector);
        ScoredDocument {
            document: doc(id, content, "@src"),
            vector,
            similarity,
        }
    }

    #[test]
    fn test_threshold_is_strict_and_sorted() {
        let q = vec![1.0, 0.0];
        // distances: 0.0, ~0.0199, ~0.2, 2.0
        let candidates = vec![
            scored(1, "a", vec![0.9, 0.4359], &q),
            scored(2, "b", vec![1.0, 0.0], &q),
            scored(3, "c", vec![0.99, 0.141], &q),
            scored(4, "d", vec![0.0, 1.0], &q),
        ];
        let out = threshold_select(candidates, 10, 0.3);
        let ids: Vec<i64> = out.iter().map(|c| c.document.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
        for w in out.windows(2) {
            assert!(w[0].distance() <= w[1].distance());
        }
        assert!(out.iter().all(|c| c.distance() < 0.3));
    }

    #[test]
    fn test_threshold_excludes_equal_distance() {
        let q = vec![1.0, 0.0];
        let candidates = vec![scored(1, "a", vec![0.0, 1.0], &q)];
        // distance is exactly 2.0
        assert!(threshold_select(candidates, 5, 2.0).is_empty());
    }

    #[test]
    fn test_threshold_returns_fewer_than_k() {
        let q = vec![1.0, 0.0];
        let candidates = vec![
            scored(1, "a", vec![1.0, 0.0], &q),
            scored(2, "b", vec![0.98, 0.2], &q),
            scored(3, "c", vec![0.0, 1.0], &q),
            scored(4, "d", vec![-1.0, 0.0], &q),
            scored(5, "e", vec![0.1, 1.0], &q),
        ];
        let out = threshold_select(candidates, 5, 0.3);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_mmr_never_exceeds_k() {
        let q = vec![1.0, 0.0, 0.0];
        let candidates: Vec<ScoredDocument> = (0..6)
            .map(|i| scored(i, &format!("doc {}", i), vec![1.0, i as f32 * 0.1, 0.0], &q))
            .collect();
        assert_eq!(mmr_select(candidates.clone(), 3, 0.5).len(), 3);
        assert_eq!(mmr_select(candidates.clone(), 10, 0.5).len(), 6);
        assert!(mmr_select(candidates, 0, 0.5).is_empty());
    }

    #[test]
    fn test_mmr_first_pick_is_most_relevant() {
        let q = vec![1.0, 0.0];
        let candidates = vec![
            scored(1, "far", vec![0.0, 1.0], &q),
            scored(2, "near", vec![1.0, 0.05], &q),
        ];
        let out = mmr_select(candidates, 1, 0.5);
        assert_eq!(out[0].document.id, 2);
    }

    #[test]
    fn test_mmr_skips_exact_duplicates() {
        let q = vec![1.0, 0.0];
        let candidates = vec![
            scored(1, "same", vec![1.0, 0.0], &q),
            scored(2, "same", vec![1.0, 0.0], &q),
            scored(3, "same", vec![1.0, 0.0], &q),
            scored(4, "other", vec![-1.0, 0.2], &q),
        ];
        let out = mmr_select(candidates, 2, 0.9);
        let contents: Vec<&str> = out.iter().map(|c| c.document.content.as_str()).collect();
        assert_eq!(contents, vec!["same", "other"]);
    }

    #[test]
    fn test_mmr_prefers_diverse_over_near_duplicate() {
        let q = vec![1.0, 0.0, 0.0];
        let candidates = vec![
            scored(1, "a", vec![1.0, 0.1, 0.0], &q),
            scored(2, "a'", vec![1.0, 0.11, 0.0], &q),
            scored(3, "b", vec![0.8, 0.0, 0.6], &q),
        ];
        let out = mmr_select(candidates, 2, 0.5);
        let ids: Vec<i64> = out.iter().map(|c| c.document.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_format_context_empty_sentinel() {
        assert_eq!(format_context(&[]), NO_DOCUMENTS_CONTEXT);
    }

    #[test]
    fn test_format_context_layout() {
        let results = vec![
            RetrievedResult {
                document: doc(1, "Kategori: Cafe", "@kopi1"),
                score: None,
            },
            RetrievedResult {
                document: doc(2, "Kategori: Roastery", ""),
                score: Some(0.1),
            },
        ];
        assert_eq!(
            format_context(&results),
            "Informasi Relevan:\n\n\
             --- Sumber 1 ---\nKategori: Cafe\n(Sumber: @kopi1)\n\n\
             --- Sumber 2 ---\nKategori: Roastery\n(Sumber: Unknown)\n\n"
        );
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("mmr".parse::<Strategy>().unwrap(), Strategy::Mmr);
        assert_eq!("threshold".parse::<Strategy>().unwrap(), Strategy::Threshold);
        assert!("bm25".parse::<Strategy>().is_err());
    }

    async fn retriever_over(records: &[SourceRecord]) -> Retriever {
        let embedder = EmbeddingService::new(Arc::new(HashingBackend::new(256)), 8);
        let docs = records_to_documents(records);
        let texts: Vec<String> = docs.iter().map(|d| d.content.clone()).collect();
        let vectors = embedder.embed_documents(&texts).await.unwrap();
        let index = InMemoryIndex::new();
        index.add(&docs, &vectors).await.unwrap();
        Retriever::new(Arc::new(index), embedder, RetrievalParams::default())
    }

    fn record(cat: &str, src: &str, desc: &str) -> SourceRecord {
        SourceRecord {
            category: cat.to_string(),
            location: "Yogyakarta".to_string(),
            source: src.to_string(),
            description: desc.to_string(),
            opinion: "".to_string(),
        }
    }

    #[tokio::test]
    async fn test_retrieve_blank_query_is_empty() {
        let retriever = retriever_over(&[record("Cafe", "@a", "kopi")]).await;
        assert!(retriever.retrieve("   ", 5, Strategy::Mmr).await.unwrap().is_empty());
        assert!(retriever.retrieve("kopi", 0, Strategy::Mmr).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_mmr_has_no_scores() {
        let retriever = retriever_over(&[
            record("Cafe", "@a", "kopi susu"),
            record("Cafe", "@b", "teh manis"),
            record("Cafe", "@c", "roti bakar"),
        ])
        .await;
        let out = retriever.retrieve("kopi susu", 2, Strategy::Mmr).await.unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.score.is_none()));
    }

    #[tokio::test]
    async fn test_retrieve_huge_k_returns_whole_index() {
        let retriever = retriever_over(&[
            record("Cafe", "@a", "kopi susu"),
            record("Roastery", "@b", "biji kopi"),
        ])
        .await;
        let mmr = retriever.retrieve("kopi", usize::MAX, Strategy::Mmr).await.unwrap();
        assert_eq!(mmr.len(), 2);
        let threshold = retriever
            .retrieve("kopi", usize::MAX, Strategy::Threshold)
            .await
            .unwrap();
        assert!(threshold.len() <= 2);
    }

    #[test]
    fn test_mmr_relevance_uses_stored_similarity() {
        let q = vec![1.0, 0.0];
        let mut low = scored(1, "low", vec![1.0, 0.0], &q);
        low.similarity = 0.1;
        let mut high = scored(2, "high", vec![0.0, 1.0], &q);
        high.similarity = 0.9;
        let out = mmr_select(vec![low, high], 1, 0.5);
        assert_eq!(out[0].document.id, 2);
    }

    #[tokio::test]
    async fn test_retrieve_threshold_unrelated_query_is_empty() {
        let retriever = retriever_over(&[record("Cafe", "@a", "kopi susu")]).await;
        let out = retriever
            .retrieve("zzzz qqqq", 5, Strategy::Threshold)
            .await
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(format_context(&out), NO_DOCUMENTS_CONTEXT);
    }
}
