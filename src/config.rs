//! Configuration parsing and validation.
//!
//! kopi-rag is configured via a TOML file (default `./config/kopi.toml`)
//! layered under a handful of environment variables. A `.env` file in the
//! working directory is loaded first, so either source works.
//!
//! # Example
//!
//! ```toml
//! [paths]
//! csv = "data/processed/extracted_data_sahabatai.csv"
//! vector_store = "data/vector_store"
//!
//! [embedding]
//! provider = "local"
//! model = "multilingual-e5-large"
//! batch_size = 32
//!
//! [retrieval]
//! top_k = 5
//! score_threshold = 0.3
//! strategy = "mmr"
//!
//! [generation]
//! model = "llama-3.3-70b-versatile"
//! max_retries = 3
//! retry_delay_secs = 2.0
//! ```
//!
//! # Environment overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `GROQ_API_KEY` | `generation.api_key` (never read from TOML) |
//! | `GROQ_MODEL` | `generation.model` |
//! | `EMBEDDING_MODEL` | `embedding.model` |
//! | `TOP_K_RESULTS` | `retrieval.top_k` |
//! | `SCORE_THRESHOLD` | `retrieval.score_threshold` |
//! | `MAX_RETRIES` | `generation.max_retries` |
//! | `RETRY_DELAY` | `generation.retry_delay_secs` |
//! | `VECTOR_STORE_DIR` | `paths.vector_store` |

use anyhow::{bail, Context, Result};
use kopi_rag_core::retrieve::{RetrievalParams, Strategy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Path used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/kopi.toml";

pub const DEFAULT_SYSTEM_PROMPT: &str = "Anda adalah asisten yang membantu memberikan informasi coffee shop di Yogyakarta.
Berdasarkan informasi yang diberikan, berikan rekomendasi yang relevan, jelas, dan membantu.
Fokus pada lokasi, suasana, menu, dan fasilitas yang tersedia.
Jika informasi tidak cukup, katakan dengan jujur.";

pub const DEFAULT_CONTEXT_TEMPLATE: &str = "Gunakan data berikut untuk menjawab pertanyaan.
Jika data tidak cukup, katakan dengan jujur.

Data:
{context}

Pertanyaan:
{query}

Jawaban:";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_csv")]
    pub csv: PathBuf,
    /// Index directory; the SQLite file lives inside it.
    #[serde(default = "default_vector_store")]
    pub vector_store: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            csv: default_csv(),
            vector_store: default_vector_store(),
        }
    }
}

fn default_csv() -> PathBuf {
    PathBuf::from("data/processed/extracted_data_sahabatai.csv")
}
fn default_vector_store() -> PathBuf {
    PathBuf::from("data/vector_store")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `local`, `openai`, or `hash`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_max_retries")]
    pub max_retries: u32,
    /// Base backoff for the `openai` provider.
    #[serde(default = "default_embedding_retry_delay_secs")]
    pub retry_delay_secs: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the `openai` provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_embedding_max_retries(),
            retry_delay_secs: default_embedding_retry_delay_secs(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_embedding_model() -> Option<String> {
    Some("multilingual-e5-large".to_string())
}
fn default_batch_size() -> usize {
    32
}
fn default_embedding_max_retries() -> u32 {
    5
}
fn default_embedding_retry_delay_secs() -> f64 {
    1.0
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    /// `mmr` (alias `diversity`) or `threshold`.
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,
    #[serde(default = "default_max_question_chars")]
    pub max_question_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
            strategy: default_strategy(),
            mmr_lambda: default_mmr_lambda(),
            max_question_chars: default_max_question_chars(),
        }
    }
}

impl RetrievalConfig {
    pub fn strategy(&self) -> Result<Strategy> {
        Strategy::from_str(&self.strategy)
    }

    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            score_threshold: self.score_threshold,
            mmr_lambda: self.mmr_lambda,
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_score_threshold() -> f32 {
    0.3
}
fn default_strategy() -> String {
    "mmr".to_string()
}
fn default_mmr_lambda() -> f32 {
    0.5
}
fn default_max_question_chars() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// OpenAI-compatible base URL; `/chat/completions` is appended.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: f64,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Must contain `{context}` and `{query}`.
    #[serde(default = "default_context_template")]
    pub context_template: String,
    /// Only ever set from `GROQ_API_KEY`.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_generation_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_generation_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            system_prompt: default_system_prompt(),
            context_template: default_context_template(),
            api_key: None,
        }
    }
}

fn default_endpoint() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_generation_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.7
}
fn default_generation_max_retries() -> u32 {
    3
}
fn default_retry_delay_secs() -> f64 {
    2.0
}
fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}
fn default_context_template() -> String {
    DEFAULT_CONTEXT_TEMPLATE.to_string()
}

impl Config {
    /// Path of the SQLite file inside the index directory.
    pub fn index_db_path(&self) -> PathBuf {
        self.paths.vector_store.join("index.sqlite")
    }
}

/// Load, override from the process environment, and validate.
///
/// A missing file is only tolerated at [`DEFAULT_CONFIG_PATH`]; an
/// explicitly named file must exist.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    } else {
        parse_config_file(path)?
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

pub fn parse_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    toml::from_str(&content).with_context(|| "Failed to parse config file")
}

/// Apply environment overrides using `lookup` as the variable source.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(key) = get("GROQ_API_KEY") {
        config.generation.api_key = Some(key.trim().to_string());
    }
    if let Some(model) = get("GROQ_MODEL") {
        config.generation.model = model;
    }
    if let Some(model) = get("EMBEDDING_MODEL") {
        config.embedding.model = Some(model);
    }
    if let Some(v) = get("TOP_K_RESULTS") {
        config.retrieval.top_k = parse_env("TOP_K_RESULTS", &v)?;
    }
    if let Some(v) = get("SCORE_THRESHOLD") {
        config.retrieval.score_threshold = parse_env("SCORE_THRESHOLD", &v)?;
    }
    if let Some(v) = get("MAX_RETRIES") {
        config.generation.max_retries = parse_env("MAX_RETRIES", &v)?;
    }
    if let Some(v) = get("RETRY_DELAY") {
        config.generation.retry_delay_secs = parse_env("RETRY_DELAY", &v)?;
    }
    if let Some(dir) = get("VECTOR_STORE_DIR") {
        config.paths.vector_store = PathBuf::from(dir);
    }
    Ok(())
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid value for {}: '{}'", key, value))
}

pub fn validate(config: &Config) -> Result<()> {
    // Retrieval
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    let threshold = config.retrieval.score_threshold;
    if !threshold.is_finite() || threshold <= 0.0 {
        bail!("retrieval.score_threshold must be a finite number > 0");
    }
    if !(0.0..=1.0).contains(&config.retrieval.mmr_lambda) {
        bail!("retrieval.mmr_lambda must be in [0.0, 1.0]");
    }
    if config.retrieval.max_question_chars == 0 {
        bail!("retrieval.max_question_chars must be > 0");
    }
    config.retrieval.strategy()?;

    // Embedding
    if config.embedding.batch_size < 1 {
        bail!("embedding.batch_size must be >= 1");
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    match config.embedding.provider.as_str() {
        "local" | "hash" => {}
        "openai" => {
            if config.embedding.model.is_none() || config.embedding.dims.is_none() {
                bail!("embedding.model and embedding.dims must be specified when provider is 'openai'");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, or hash.",
            other
        ),
    }
    if !config.embedding.retry_delay_secs.is_finite() || config.embedding.retry_delay_secs < 0.0 {
        bail!("embedding.retry_delay_secs must be >= 0");
    }

    // Generation
    if config.generation.max_retries < 1 {
        bail!("generation.max_retries must be >= 1");
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        bail!("generation.temperature must be in [0.0, 2.0]");
    }
    if !config.generation.retry_delay_secs.is_finite() || config.generation.retry_delay_secs < 0.0
    {
        bail!("generation.retry_delay_secs must be >= 0");
    }
    let template = &config.generation.context_template;
    if !template.contains("{context}") || !template.contains("{query}") {
        bail!("generation.context_template must contain {{context}} and {{query}}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        validate(&config).unwrap();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.score_threshold, 0.3);
        assert_eq!(config.embedding.batch_size, 32);
        assert_eq!(config.generation.max_retries, 3);
        assert_eq!(config.generation.model, "llama-3.3-70b-versatile");
        assert_eq!(config.retrieval.strategy().unwrap(), Strategy::Mmr);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [retrieval]
            top_k = 3
            strategy = "threshold"

            [embedding]
            provider = "hash"
            dims = 64
            "#,
        )
        .unwrap();
        validate(&config).unwrap();
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.retrieval.score_threshold, 0.3);
        assert_eq!(config.embedding.dims, Some(64));
        assert_eq!(config.generation.max_tokens, 1024);
        assert_eq!(config.paths.vector_store, PathBuf::from("data/vector_store"));
    }

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(include_str!("../config/kopi.example.toml")).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(config.generation.retry_delay_secs, 2.0);
        assert_eq!(config.generation.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("GROQ_API_KEY", " gsk_test "),
                ("TOP_K_RESULTS", "7"),
                ("SCORE_THRESHOLD", "0.5"),
                ("RETRY_DELAY", "1"),
                ("VECTOR_STORE_DIR", "/tmp/idx"),
                ("GROQ_MODEL", ""),
            ]),
        )
        .unwrap();
        assert_eq!(config.generation.api_key.as_deref(), Some("gsk_test"));
        assert_eq!(config.retrieval.top_k, 7);
        assert_eq!(config.retrieval.score_threshold, 0.5);
        assert_eq!(config.generation.retry_delay_secs, 1.0);
        assert_eq!(config.paths.vector_store, PathBuf::from("/tmp/idx"));
        assert_eq!(config.generation.model, "llama-3.3-70b-versatile");
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = Config::default();
        let err = apply_env_overrides(&mut config, env(&[("TOP_K_RESULTS", "lima")])).unwrap_err();
        assert!(err.to_string().contains("TOP_K_RESULTS"));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.retrieval.top_k = 0;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.retrieval.score_threshold = f32::NAN;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.retrieval.mmr_lambda = 1.5;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.generation.temperature = 2.5;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.generation.max_retries = 0;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.embedding.provider = "ollama".to_string();
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.embedding.retry_delay_secs = f64::INFINITY;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.retrieval.strategy = "random".to_string();
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.generation.context_template = "Data: {context}".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_config(&missing).is_err());
    }

    #[test]
    fn test_index_db_path() {
        let config = Config::default();
        assert_eq!(
            config.index_db_path(),
            PathBuf::from("data/vector_store/index.sqlite")
        );
    }
}
