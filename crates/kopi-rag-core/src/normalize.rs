//! Record normalization: text cleaning and the fixed document template.
//!
//! The content template is part of the index contract. Re-ingesting the
//! same CSV must produce byte-identical content so that embeddings are
//! stable, so any change here invalidates existing indexes.

use sha2::{Digest, Sha256};

use crate::models::{Document, DocumentMetadata, SourceRecord};

/// Cell values treated as missing: the default NA markers of pandas'
/// `read_csv`. Unlike pandas, a cell matches after trimming, so `" NaN "`
/// is missing too.
const MISSING_MARKERS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// Collapse every whitespace run to a single space and trim both ends.
/// Missing markers (`NaN`, `NULL`, ...) become the empty string.
pub fn clean_text(raw: &str) -> String {
    let trimmed = raw.trim();
    if MISSING_MARKERS.contains(&trimmed) {
        return String::new();
    }
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Clean every field of a record.
pub fn clean_record(record: &SourceRecord) -> SourceRecord {
    SourceRecord {
        category: clean_text(&record.category),
        location: clean_text(&record.location),
        source: clean_text(&record.source),
        description: clean_text(&record.description),
        opinion: clean_text(&record.opinion),
    }
}

/// Render the fixed content template for an already-cleaned record.
pub fn build_content(record: &SourceRecord) -> String {
    format!(
        "Kategori: {}\nLokasi: {}\nSumber: {}\n\nDeskripsi:\n{}\n\nOpini:\n{}",
        record.category, record.location, record.source, record.description, record.opinion
    )
}

/// Convert raw records into documents with ids `1..=n` in input order.
pub fn records_to_documents(records: &[SourceRecord]) -> Vec<Document> {
    records
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let record = clean_record(raw);
            let id = i as i64 + 1;
            Document {
                id,
                content: build_content(&record),
                metadata: DocumentMetadata {
                    id,
                    category: record.category,
                    location: record.location,
                    source: record.source,
                },
            }
        })
        .collect()
}

/// SHA-256 over the ordered document contents.
///
/// Two ingestions of the same source produce the same fingerprint.
pub fn content_fingerprint(documents: &[Document]) -> String {
    let mut hasher = Sha256::new();
    for doc in documents {
        hasher.update((doc.content.len() as u64).to_le_bytes());
        hasher.update(doc.content.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
