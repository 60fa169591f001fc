//! Embedding backend trait, the prefix-aware embedding service, and vector
//! utilities.
//!
//! The retrieval model used by kopi-rag (multilingual E5) is asymmetric:
//! documents must be encoded as `"passage: <text>"` and questions as
//! `"query: <text>"`. Mixing the two silently degrades ranking, so callers
//! never talk to an [`EmbeddingBackend`] directly. They go through
//! [`EmbeddingService`], which owns the prefix convention, batching, and
//! unit-length normalization.
//!
//! Concrete backends (fastembed, OpenAI-compatible HTTP) live in the
//! application crate. [`HashingBackend`] is a dependency-free backend for
//! offline runs and tests.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

/// A raw text-embedding backend.
///
/// Backends receive fully prefixed text and return one vector per input,
/// in input order. They do not need to normalize.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Returns the model identifier (e.g. `"multilingual-e5-large"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1024`).
    fn dims(&self) -> usize;
    /// Embed one batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Which side of the asymmetric encoding a text belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    /// Stored documents.
    Passage,
    /// User questions.
    Query,
}

impl EmbedMode {
    pub fn prefix(self) -> &'static str {
        match self {
            EmbedMode::Passage => "passage: ",
            EmbedMode::Query => "query: ",
        }
    }
}

/// Prefix-aware, batching, normalizing wrapper around a backend.
#[derive(Clone)]
pub struct EmbeddingService {
    backend: Arc<dyn EmbeddingBackend>,
    batch_size: usize,
}

impl EmbeddingService {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, batch_size: usize) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
        }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub fn dims(&self) -> usize {
        self.backend.dims()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Embed a single text under the given mode.
    pub async fn embed_one(&self, text: &str, mode: EmbedMode) -> Result<Vec<f32>> {
        self.embed_many(&[text.to_string()], mode)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }

    /// Embed many texts under the given mode, `batch_size` texts per
    /// backend call. Every returned vector has unit length (or is all
    /// zeros for degenerate input).
    pub async fn embed_many(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        let expected_dims = self.backend.dims();

        for batch in texts.chunks(self.batch_size) {
            let prefixed: Vec<String> = batch
                .iter()
                .map(|t| format!("{}{}", mode.prefix(), t))
                .collect();

            let vectors = self.backend.embed(&prefixed).await?;
            if vectors.len() != batch.len() {
                bail!(
                    "Embedding backend '{}' returned {} vectors for {} texts",
                    self.backend.model_name(),
                    vectors.len(),
                    batch.len()
                );
            }

            for v in vectors {
                if expected_dims > 0 && v.len() != expected_dims {
                    bail!(
                        "Embedding backend '{}' returned a {}-dim vector, expected {}",
                        self.backend.model_name(),
                        v.len(),
                        expected_dims
                    );
                }
                out.push(normalize_l2(v));
            }
        }

        Ok(out)
    }

    /// Embed stored documents (`"passage: "` prefix).
    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_many(texts, EmbedMode::Passage).await
    }

    /// Embed a user question (`"query: "` prefix).
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text, EmbedMode::Query).await
    }
}

// ============ Hashing backend ============

/// Deterministic feature-hashing embedder.
///
/// Lowercased alphanumeric tokens are hashed (FNV-1a) into `dims` signed
/// buckets. Texts sharing words land close together, which is enough for
/// offline smoke runs and tests. No model download, no network.
pub struct HashingBackend {
    dims: usize,
}

impl HashingBackend {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

#[async_trait]
impl EmbeddingBackend for HashingBackend {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t, self.dims)).collect())
    }
}

fn hash_embed(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0f32; dims];
    let lower = text.to_lowercase();
    for token in lower.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
        let h = fnv1a(token.as_bytes());
        let idx = (h % dims as u64) as usize;
        let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        v[idx] += sign;
    }
    v
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

// ============ Vector utilities ============

/// Scale a vector to unit L2 norm. Near-zero vectors are returned as-is.
pub fn normalize_l2(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use kopi_rag_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors
/// of different lengths, or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Squared Euclidean distance between two unit vectors, derived from cosine
/// similarity: `2 - 2·cos`. Range `[0, 4]`, lower is better.
pub fn distance_from_similarity(similarity: f32) -> f32 {
    (2.0 - 2.0 * similarity).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every batch it receives and returns a fixed vector per text.
    struct RecordingBackend {
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl RecordingBackend {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EmbeddingBackend for RecordingBackend {
        fn model_name(&self) -> &str {
            "recording"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.lock().unwrap().push(texts.to_vec());
            Ok(texts.iter().map(|_| vec![3.0, 4.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_passage_prefix_and_batching() {
        let backend = Arc::new(RecordingBackend::new());
        let service = EmbeddingService::new(backend.clone(), 2);
        let texts: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();

        let vectors = service.embed_documents(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], vec!["passage: a", "passage: b"]);
        assert_eq!(calls[1], vec!["passage: c"]);
    }

    #[tokio::test]
    async fn test_query_prefix() {
        let backend = Arc::new(RecordingBackend::new());
        let service = EmbeddingService::new(backend.clone(), 8);
        service.embed_query("kopi enak").await.unwrap();
        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls[0], vec!["query: kopi enak"]);
    }

    #[tokio::test]
    async fn test_vectors_are_normalized() {
        let service = EmbeddingService::new(Arc::new(RecordingBackend::new()), 4);
        let v = service.embed_query("x").await.unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_same_text_same_mode_is_deterministic() {
        let service = EmbeddingService::new(Arc::new(HashingBackend::new(64)), 4);
        let a = service.embed_one("kopi susu gula aren", EmbedMode::Query).await.unwrap();
        let b = service.embed_one("kopi susu gula aren", EmbedMode::Query).await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_modes_produce_different_vectors() {
        let service = EmbeddingService::new(Arc::new(HashingBackend::new(128)), 4);
        let q = service.embed_one("kopi", EmbedMode::Query).await.unwrap();
        let p = service.embed_one("kopi", EmbedMode::Passage).await.unwrap();
        assert_ne!(q, p);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_error() {
        struct Wrong;
        #[async_trait]
        impl EmbeddingBackend for Wrong {
            fn model_name(&self) -> &str {
                "wrong"
            }
            fn dims(&self) -> usize {
                3
            }
            async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![1.0]).collect())
            }
        }
        let service = EmbeddingService::new(Arc::new(Wrong), 4);
        assert!(service.embed_query("x").await.is_err());
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_distance_polarity() {
        assert_eq!(distance_from_similarity(1.0), 0.0);
        assert!((distance_from_similarity(0.0) - 2.0).abs() < 1e-6);
        assert!((distance_from_similarity(-1.0) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector() {
        assert_eq!(normalize_l2(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }
}
