//! # Balanced RAG Core
//!
//! Shared, runtime-agnostic logic for Balanced RAG: the passage model,
//! content validation, dataset normalizers, the vector store and embedding
//! traits, source-balanced retrieval, and the ingestion pipeline.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Storage and
//! gateways are reached only through the [`store::VectorStore`] and
//! [`embedding::Embedder`] traits, which the application crate implements.

pub mod embedding;
pub mod error;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod quota;
pub mod retrieve;
pub mod store;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;
