//! Vector store abstraction for Balanced RAG.
//!
//! The [`VectorStore`] trait defines the storage operations needed by the
//! ingestion pipeline (the only writer) and the retriever (the only
//! reader). Implementations must be `Send + Sync` and must enforce the
//! content-hash uniqueness invariant themselves.

pub mod memory;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::models::{Neighbor, Passage};

/// Abstract storage backend for passages and their vectors.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`count`](VectorStore::count) | Total stored passages |
/// | [`count_by_source`](VectorStore::count_by_source) | Stored passages per source |
/// | [`existing_hashes`](VectorStore::existing_hashes) | Which content hashes are already stored |
/// | [`bulk_insert`](VectorStore::bulk_insert) | Insert a batch, skipping known hashes |
/// | [`nearest_neighbors`](VectorStore::nearest_neighbors) | Cosine-ranked search |
/// | [`diverse_neighbors`](VectorStore::diverse_neighbors) | MMR search over a wider pool |
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn count(&self) -> Result<u64>;

    /// Stored passage counts grouped by source, sorted by source name.
    async fn count_by_source(&self) -> Result<Vec<(String, u64)>>;

    /// The subset of `hashes` that is already stored.
    async fn existing_hashes(&self, hashes: &[String]) -> Result<HashSet<String>>;

    /// Insert a batch atomically.
    ///
    /// A passage whose content hash is already stored (or repeated within
    /// the batch) is skipped, never overwritten. Returns the number of rows
    /// actually inserted.
    async fn bulk_insert(&self, passages: &[Passage]) -> Result<u64>;

    /// Up to `k` passages ordered by descending cosine similarity,
    /// optionally restricted to one source.
    async fn nearest_neighbors(
        &self,
        query: &[f32],
        k: usize,
        source: Option<&str>,
    ) -> Result<Vec<Neighbor>>;

    /// Up to `k` passages chosen by maximal marginal relevance from the
    /// `pool_size` nearest neighbors.
    ///
    /// `diversity_lambda` weighs query similarity against redundancy:
    /// `1.0` is pure relevance, `0.0` is maximum diversity.
    async fn diverse_neighbors(
        &self,
        query: &[f32],
        k: usize,
        pool_size: usize,
        diversity_lambda: f64,
        source: Option<&str>,
    ) -> Result<Vec<Neighbor>> {
        let pool = self
            .nearest_neighbors(query, pool_size.max(k), source)
            .await?;
        Ok(max_marginal_relevance(pool, k, diversity_lambda))
    }
}

/// Greedy MMR selection over a similarity-sorted candidate pool.
///
/// Each step picks the candidate maximizing
/// `λ·sim(query, c) − (1−λ)·max sim(c, selected)`. Ties keep the earlier
/// (more similar) candidate.
pub fn max_marginal_relevance(pool: Vec<Neighbor>, k: usize, lambda: f64) -> Vec<Neighbor> {
    let mut remaining = pool;
    let mut selected: Vec<Neighbor> = Vec::with_capacity(k.min(remaining.len()));

    while selected.len() < k && !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_score = f64::NEG_INFINITY;

        for (i, cand) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|s| cosine_similarity(&s.passage.vector, &cand.passage.vector) as f64)
                .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
                .unwrap_or(0.0);

            let score = lambda * cand.similarity - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_idx = i;
            }
        }

        selected.push(remaining.remove(best_idx));
    }

    selected
}

/// Sort neighbors by descending similarity and keep the first `k`.
pub fn rank_neighbors(mut neighbors: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    neighbors.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    neighbors.truncate(k);
    neighbors
}
