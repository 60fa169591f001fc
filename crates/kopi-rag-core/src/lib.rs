//! # kopi-rag core
//!
//! Shared, I/O-free logic for kopi-rag: data models, record normalization,
//! the embedding service and backend trait, the vector index trait, and the
//! retrieval strategies that feed the answer generator.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! The application crate supplies the persistent index and the concrete
//! embedding backends.

pub mod embedding;
pub mod models;
pub mod normalize;
pub mod retrieve;
pub mod store;
