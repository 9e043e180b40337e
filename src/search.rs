//! Source-balanced query over the configured store.
//!
//! [`query_passages`] is shared by `brag query`, `brag ask`, and the HTTP
//! server. It resolves the source catalog, then delegates to the core
//! retriever.

use anyhow::{bail, Result};

use balanced_rag_core::embedding::Embedder;
use balanced_rag_core::error::RagError;
use balanced_rag_core::models::RetrievedPassage;
use balanced_rag_core::quota::SourceCatalog;
use balanced_rag_core::retrieve::retrieve;
use balanced_rag_core::store::VectorStore;

use crate::config::{Config, RetrievalConfig};
use crate::embedding::create_embedder;
use crate::sqlite_store::SqliteStore;

/// The configured catalog, or the store's per-source counts when the
/// configuration lists no sources.
pub async fn resolve_catalog(
    store: &dyn VectorStore,
    retrieval: &RetrievalConfig,
) -> Result<SourceCatalog, RagError> {
    if !retrieval.catalog.is_empty() {
        return Ok(retrieval.source_catalog());
    }
    let counts = store.count_by_source().await?;
    tracing::debug!(sources = counts.len(), "using stored per-source counts as catalog");
    Ok(SourceCatalog::new(counts))
}

/// Retrieve up to `k` passages (default `retrieval.default_k`) for `query`.
pub async fn query_passages(
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    retrieval: &RetrievalConfig,
    query: &str,
    k: Option<usize>,
) -> Result<Vec<RetrievedPassage>, RagError> {
    let params = retrieval.params();
    let k = k.unwrap_or(retrieval.default_k);
    params.check_total_k(k)?;

    let catalog = resolve_catalog(store, retrieval).await?;
    let results = retrieve(store, embedder, &catalog, &params, query, k).await?;
    tracing::debug!(k, returned = results.len(), "query complete");
    Ok(results)
}

/// `brag query`: print the balanced results for one query.
pub async fn run_query(config: &Config, query: &str, k: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Querying requires embeddings. Set [embedding] provider in config.");
    }

    let store = SqliteStore::open(config).await?;
    let embedder = create_embedder(&config.embedding)?;

    let results = query_passages(&store, embedder.as_ref(), &config.retrieval, query, k).await?;

    if results.is_empty() {
        println!("No results.");
    }
    for (i, result) in results.iter().enumerate() {
        println!("{}. [{:.3}] {}", i + 1, result.score, result.source);
        println!("    \"{}\"", result.text.replace('\n', " ").trim());
        println!();
    }

    store.pool().close().await;
    Ok(())
}
