//! Concrete embedding backends and backend selection.
//!
//! Implements [`EmbeddingBackend`] for:
//! - **[`LocalBackend`]** runs the model in-process via fastembed; no
//!   network calls after the first model download.
//! - **[`OpenAIBackend`]** calls an OpenAI-compatible `/embeddings`
//!   endpoint with batching, retry, and backoff.
//! - **[`HashingBackend`]** (from the core crate) is deterministic and
//!   offline; used by tests and for smoke runs without a model.
//!
//! Prefixing (`passage: ` / `query: `) and normalization are handled by
//! [`EmbeddingService`]; backends only see the final text.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use kopi_rag::config::EmbeddingConfig;
//! use kopi_rag::embedding::create_service;
//!
//! let config = EmbeddingConfig {
//!     provider: "hash".to_string(),
//!     dims: Some(64),
//!     ..EmbeddingConfig::default()
//! };
//! let service = create_service(&config).await?;
//! assert_eq!(service.dims(), 64);
//! # Ok(())
//! # }
//! ```
//!
//! # Retry Strategy
//!
//! The OpenAI backend makes up to `embedding.max_retries + 1` attempts.
//! HTTP 429, 408, 5xx, network errors and unreadable bodies are retried
//! after `embedding.retry_delay_secs · 2^n`; any other HTTP error fails at
//! once.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use kopi_rag_core::embedding::{EmbeddingBackend, EmbeddingService, HashingBackend};

use crate::config::EmbeddingConfig;
use crate::retry::{backoff_delay, delay_from_secs, is_transient_status, Sleeper, TokioSleeper};

/// Dimensionality of the `hash` provider when `embedding.dims` is unset.
pub const DEFAULT_HASH_DIMS: usize = 384;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Build the configured backend and wrap it in an [`EmbeddingService`].
///
/// Loading a local model happens here, so a failure surfaces at startup.
pub async fn create_service(config: &EmbeddingConfig) -> Result<EmbeddingService> {
    let backend = create_backend(config).await?;
    tracing::info!(
        provider = %config.provider,
        model = backend.model_name(),
        dims = backend.dims(),
        batch_size = config.batch_size,
        "embedding backend ready"
    );
    Ok(EmbeddingService::new(backend, config.batch_size))
}

/// Create the backend named by `config.provider`.
///
/// | Config Value | Backend |
/// |-------------|---------|
/// | `"local"` | [`LocalBackend`] (requires `local-embeddings-fastembed`) |
/// | `"openai"` | [`OpenAIBackend`] |
/// | `"hash"` | [`HashingBackend`] |
pub async fn create_backend(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingBackend>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashingBackend::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        "openai" => Ok(Arc::new(OpenAIBackend::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalBackend::load(config).await?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Strip a hub organisation prefix: `intfloat/multilingual-e5-large`
/// becomes `multilingual-e5-large`.
pub fn canonical_model_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Resolve the local model name and its dimensionality.
pub fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = canonical_model_name(
        config
            .model
            .as_deref()
            .unwrap_or("multilingual-e5-large"),
    )
    .to_string();

    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        _ => 1024,
    });

    (model_name, dims)
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

/// In-process embedding model. Loaded once; inference runs on the
/// blocking thread pool.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalBackend {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalBackend {
    pub async fn load(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        let fastembed_model = config_to_fastembed_model(&model_name)?;

        tracing::info!(model = %model_name, "loading local embedding model");
        let model = tokio::task::spawn_blocking(move || {
            fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
            )
            .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))
        })
        .await??;

        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingBackend for LocalBackend {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow::anyhow!("Local embedding model lock poisoned"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

// ============ OpenAI-compatible HTTP ============

/// Embedding backend for any OpenAI-compatible `/embeddings` endpoint.
///
/// Reads the key from `OPENAI_API_KEY`.
pub struct OpenAIBackend {
    model: String,
    dims: usize,
    endpoint: String,
    api_key: String,
    max_retries: u32,
    retry_delay: Duration,
    client: reqwest::Client,
    sleeper: Arc<dyn Sleeper>,
}

#[derive(serde::Serialize)]
struct EmbeddingsBody<'a> {
    model: &'a str,
    input: &'a [String],
}

/// One failed attempt, and whether another one may succeed.
enum Attempt {
    Transient(anyhow::Error),
    Fatal(anyhow::Error),
}

impl OpenAIBackend {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let base = config.url.as_deref().unwrap_or(DEFAULT_OPENAI_URL);

        Ok(Self {
            model,
            dims,
            endpoint: format!("{}/embeddings", base.trim_end_matches('/')),
            api_key: api_key.into(),
            max_retries: config.max_retries,
            retry_delay: delay_from_secs(config.retry_delay_secs),
            client,
            sleeper: Arc::new(TokioSleeper),
        })
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    async fn attempt(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Attempt> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingsBody {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| Attempt::Transient(e.into()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = anyhow::anyhow!("Embedding API error {}: {}", status, body);
            return Err(if is_transient_status(status.as_u16()) {
                Attempt::Transient(err)
            } else {
                Attempt::Fatal(err)
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Attempt::Transient(e.into()))?;
        parse_embeddings_response(&json).map_err(Attempt::Fatal)
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAIBackend {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let attempts = self.max_retries.saturating_add(1);

        let mut attempt = 0;
        loop {
            match self.attempt(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(Attempt::Fatal(e)) => return Err(e),
                Err(Attempt::Transient(e)) => {
                    attempt += 1;
                    if attempt >= attempts {
                        return Err(e.context(format!(
                            "embedding request failed after {} attempts",
                            attempts
                        )));
                    }
                    let delay = backoff_delay(self.retry_delay, attempt - 1);
                    tracing::warn!(
                        attempt,
                        delay_secs = delay.as_secs_f64(),
                        error = %e,
                        "retrying embedding request"
                    );
                    self.sleeper.sleep(delay).await;
                }
            }
        }
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}
