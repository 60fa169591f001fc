//! # kopi-rag
//!
//! A retrieval-augmented assistant that recommends Yogyakarta coffee shops
//! from a CSV of Instagram-sourced reviews.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────┐
//! │   CSV    │──▶│ Clean+Embed  │──▶│  SQLite  │
//! │ (ingest) │   │  (passage:)  │   │  vectors │
//! └──────────┘   └──────────────┘   └────┬─────┘
//!                                        │
//!                  ┌─────────────────────┤
//!                  ▼                     ▼
//!            ┌───────────┐        ┌────────────┐
//!            │ Retriever │───────▶│ Generator  │
//!            │ MMR/thres │ context│ (Groq API) │
//!            └───────────┘        └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kopi init
//! kopi ingest --csv data/processed/extracted_data_sahabatai.csv
//! kopi search "kopi susu di Sleman" --strategy threshold
//! kopi chat
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`db`] | Index database connection |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | SQLite-backed vector index |
//! | [`embedding`] | Embedding backends (fastembed, OpenAI, hash) |
//! | [`ingest`] | CSV ingestion |
//! | [`generate`] | Chat completion with retry/backoff |
//! | [`retry`] | Backoff delays shared by the HTTP clients |
//! | [`app`] | Question answering |
//! | [`search`] | Retrieval-only CLI output |
//! | [`stats`] | Index statistics |
//! | [`repl`] | Interactive loop and one-shot ask |
//! | [`logging`] | Tracing subscriber setup |
//!
//! Models, normalization, the embedding service, and the retrieval
//! strategies live in the `kopi-rag-core` crate.

pub mod app;
pub mod config;
pub mod db;
pub mod embedding;
pub mod generate;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod repl;
pub mod retry;
pub mod search;
pub mod sqlite_store;
pub mod stats;
