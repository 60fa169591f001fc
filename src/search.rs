//! `kopi search`: run retrieval only and print what was found.

use anyhow::Result;
use std::str::FromStr;

use kopi_rag_core::models::RetrievedResult;
use kopi_rag_core::retrieve::{format_context, Strategy};

use crate::app::open_retriever;
use crate::config::Config;

const EXCERPT_CHARS: usize = 160;

pub async fn run_search(
    config: &Config,
    query: &str,
    strategy: Option<String>,
    limit: Option<usize>,
    show_context: bool,
) -> Result<()> {
    let strategy = match strategy {
        Some(s) => Strategy::from_str(&s)?,
        None => config.retrieval.strategy()?,
    };
    let k = limit.unwrap_or(config.retrieval.top_k);
    if k == 0 {
        anyhow::bail!("--limit must be >= 1");
    }

    let retriever = open_retriever(config).await?;
    let results = retriever.retrieve(query, k, strategy).await?;

    if show_context {
        println!("{}", format_context(&results));
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!("{}", result_header(i + 1, result));
        println!("    kategori: {}", result.document.metadata.category);
        println!("    excerpt: \"{}\"", excerpt(&result.document.content, EXCERPT_CHARS));
        println!("    id: {}", result.document.id);
        println!();
    }
    Ok(())
}

fn result_header(rank: usize, result: &RetrievedResult) -> String {
    match result.score {
        Some(distance) => format!(
            "{}. [{:.4}] {} / {}",
            rank,
            distance,
            result.source_name(),
            result.location()
        ),
        None => format!("{}. {} / {}", rank, result.source_name(), result.location()),
    }
}

/// The description section of a document on one line, cut to `max_chars`.
fn excerpt(content: &str, max_chars: usize) -> String {
    let body = content
        .split_once("Deskripsi:\n")
        .map(|(_, rest)| rest)
        .unwrap_or(content);
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kopi_rag_core::models::{Document, DocumentMetadata};

    fn result(score: Option<f32>) -> RetrievedResult {
        RetrievedResult {
            document: Document {
                id: 3,
                content: "Kategori: Cafe\nLokasi: Sleman\nSumber: @a\n\nDeskripsi:\nLuas dan\nnyaman.\n\nOpini:\nEnak."
                    .to_string(),
                metadata: DocumentMetadata {
                    id: 3,
                    category: "Cafe".to_string(),
                    location: "Sleman".to_string(),
                    source: "@a".to_string(),
                },
            },
            score,
        }
    }

    #[test]
    fn test_result_header() {
        assert_eq!(result_header(1, &result(Some(0.125))), "1. [0.1250] @a / Sleman");
        assert_eq!(result_header(2, &result(None)), "2. @a / Sleman");
    }

    #[test]
    fn test_excerpt_starts_at_description() {
        let r = result(None);
        assert_eq!(
            excerpt(&r.document.content, 160),
            "Luas dan nyaman. Opini: Enak."
        );
        assert_eq!(excerpt(&r.document.content, 4), "Luas...");
    }
}
