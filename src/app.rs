//! Question answering: retrieval, context assembly, generation.

use anyhow::{bail, Result};
use std::sync::Arc;

use kopi_rag_core::models::RetrievedResult;
use kopi_rag_core::retrieve::{format_context, Retriever, Strategy};
use kopi_rag_core::store::VectorIndex;

use crate::config::Config;
use crate::db::{self, INGEST_HINT};
use crate::embedding;
use crate::generate::AnswerGenerator;
use crate::sqlite_store::SqliteIndex;

/// Shown when retrieval finds nothing; the LLM is not called.
pub const NO_INFORMATION_ANSWER: &str = "Maaf, tidak ada informasi yang relevan ditemukan.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub name: String,
    pub location: String,
}

impl From<&RetrievedResult> for SourceRef {
    fn from(result: &RetrievedResult) -> Self {
        Self {
            name: result.source_name().to_string(),
            location: result.location().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

pub struct RagApp {
    retriever: Retriever,
    generator: AnswerGenerator,
    top_k: usize,
    strategy: Strategy,
}

impl RagApp {
    pub fn new(
        retriever: Retriever,
        generator: AnswerGenerator,
        top_k: usize,
        strategy: Strategy,
    ) -> Self {
        Self {
            retriever,
            generator,
            top_k,
            strategy,
        }
    }

    /// Wire the app from configuration.
    ///
    /// Fails fast on a missing credential, a missing or empty index, or an
    /// embedding model that cannot be loaded.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let generator = AnswerGenerator::from_config(&config.generation)?;
        let retriever = open_retriever(config).await?;
        Ok(Self::new(
            retriever,
            generator,
            config.retrieval.top_k,
            config.retrieval.strategy()?,
        ))
    }

    pub async fn ask(&self, question: &str) -> Result<Answer> {
        let results = self
            .retriever
            .retrieve(question, self.top_k, self.strategy)
            .await?;
        tracing::info!(
            strategy = %self.strategy,
            k = self.top_k,
            retrieved = results.len(),
            "retrieval done"
        );

        if results.is_empty() {
            return Ok(Answer {
                answer: NO_INFORMATION_ANSWER.to_string(),
                sources: Vec::new(),
            });
        }

        let context = format_context(&results);
        let answer = self.generator.generate(question, &context).await;

        Ok(Answer {
            answer,
            sources: results.iter().map(SourceRef::from).collect(),
        })
    }
}

/// Open the persisted index for serving and build a [`Retriever`] over it.
pub async fn open_retriever(config: &Config) -> Result<Retriever> {
    let pool = db::open_existing(config).await?;
    let index = SqliteIndex::new(pool);

    let count = match index.count().await {
        Ok(n) => n,
        Err(e) => bail!("Vector store is not initialized ({}); {}", e, INGEST_HINT),
    };
    if count == 0 {
        bail!("Vector store is empty; {}", INGEST_HINT);
    }

    let embedder = embedding::create_service(&config.embedding).await?;
    let info = index.read_info().await?;
    let Some(dims) = info.dims else {
        bail!("Vector store has no index metadata (incomplete ingest?); {}", INGEST_HINT);
    };
    if dims != embedder.dims() {
        bail!(
            "Index was built with {}-dim vectors ({}) but the embedding model produces {}; re-run `kopi ingest`",
            dims,
            info.model.as_deref().unwrap_or("unknown model"),
            embedder.dims()
        );
    }
    tracing::info!(documents = count, "vector store loaded");

    let index: Arc<dyn VectorIndex> = Arc::new(index);
    Ok(Retriever::new(index, embedder, config.retrieval.params()))
}

/// Render an answer the way the CLI prints it.
pub fn format_answer(answer: &Answer) -> String {
    let mut out = format!("\nJawaban:\n{}\n{}\n\n", "=".repeat(60), answer.answer);
    if !answer.sources.is_empty() {
        out.push_str(&format!("Sumber informasi:\n{}\n", "-".repeat(60)));
        for (i, source) in answer.sources.iter().enumerate() {
            out.push_str(&format!("{}. {} - {}\n", i + 1, source.name, source.location));
        }
    }
    out.push('\n');
    out
}

pub fn print_answer(answer: &Answer) {
    print!("{}", format_answer(answer));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use crate::sqlite_store::IndexInfo;
    use kopi_rag_core::models::{Document, DocumentMetadata};
    use tempfile::TempDir;

    fn hash_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.paths.vector_store = dir.path().join("vector_store");
        config.embedding.provider = "hash".to_string();
        config.embedding.dims = Some(8);
        config
    }

    async fn seeded_index(config: &Config) -> SqliteIndex {
        let pool = db::connect(config).await.unwrap();
        migrate::apply_schema(&pool).await.unwrap();
        SqliteIndex::new(pool)
    }

    fn shop() -> (Document, Vec<f32>) {
        let doc = Document {
            id: 1,
            content: "Kategori: Cafe".to_string(),
            metadata: DocumentMetadata {
                id: 1,
                category: "Cafe".to_string(),
                location: "Sleman".to_string(),
                source: "@kopi".to_string(),
            },
        };
        (doc, vec![1.0; 8])
    }

    #[tokio::test]
    async fn test_open_retriever_rejects_rows_without_metadata() {
        let dir = TempDir::new().unwrap();
        let config = hash_config(&dir);
        let index = seeded_index(&config).await;
        let (doc, vector) = shop();
        index.add(&[doc], &[vector]).await.unwrap();
        index.pool().close().await;

        let err = open_retriever(&config).await.err().unwrap();
        assert!(err.to_string().contains("no index metadata"));
        assert!(err.to_string().contains(INGEST_HINT));
    }

    #[tokio::test]
    async fn test_open_retriever_checks_dims() {
        let dir = TempDir::new().unwrap();
        let mut config = hash_config(&dir);
        let index = seeded_index(&config).await;
        let (doc, vector) = shop();
        let info = IndexInfo {
            model: Some("hash".to_string()),
            dims: Some(8),
            ingested_at: None,
            fingerprint: None,
        };
        index
            .commit_ingest(&[doc], &[vector], &info, true)
            .await
            .unwrap();
        index.pool().close().await;

        assert!(open_retriever(&config).await.is_ok());

        config.embedding.dims = Some(16);
        let err = open_retriever(&config).await.err().unwrap();
        assert!(err.to_string().contains("8-dim"));
    }

    #[test]
    fn test_format_answer_with_sources() {
        let answer = Answer {
            answer: "Coba Kopi Klotok.".to_string(),
            sources: vec![
                SourceRef {
                    name: "@kopiklotok".to_string(),
                    location: "Sleman".to_string(),
                },
                SourceRef {
                    name: "Unknown".to_string(),
                    location: "Bantul".to_string(),
                },
            ],
        };
        let rendered = format_answer(&answer);
        assert!(rendered.starts_with("\nJawaban:\n"));
        assert!(rendered.contains("Coba Kopi Klotok.\n\nSumber informasi:\n"));
        assert!(rendered.ends_with("1. @kopiklotok - Sleman\n2. Unknown - Bantul\n\n"));
    }

    #[test]
    fn test_format_answer_without_sources() {
        let answer = Answer {
            answer: NO_INFORMATION_ANSWER.to_string(),
            sources: Vec::new(),
        };
        let rendered = format_answer(&answer);
        assert!(rendered.ends_with(&format!("{}\n\n\n", NO_INFORMATION_ANSWER)));
        assert!(!rendered.contains("Sumber informasi"));
    }
}
