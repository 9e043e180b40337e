//! Source-balanced retrieval.
//!
//! The retriever operates entirely through the [`VectorStore`] and
//! [`Embedder`] traits. For one query it:
//!
//! 1. Allocates per-source quotas from the [`SourceCatalog`] (see [`crate::quota`]).
//! 2. For every source with a positive quota, runs in parallel an MMR
//!    search for `quota` results out of a `pool_size` pool and a plain
//!    nearest-neighbor search over the same pool, then joins the two by
//!    passage text to give each MMR pick its similarity (`0.0` if absent).
//! 3. Multiplies each similarity by the source boost `1 + w(s)/Σw`.
//! 4. Drops repeated texts (first occurrence in catalog order wins), sorts
//!    by boosted score descending, and keeps the first `total_k`.
//!
//! Any failing source search fails the whole call: returning the other
//! sources alone would silently break the fairness guarantee.

use std::collections::{HashMap, HashSet};

use futures::future::{try_join, try_join_all};
use serde::Serialize;

use crate::embedding::{check_batch_shape, Embedder};
use crate::error::{RagError, Result};
use crate::models::{RetrievedPassage, ScoredCandidate};
use crate::quota::{allocate_from_weights, RetrievalQuota, SourceCatalog, SourceWeights};
use crate::store::VectorStore;

pub const DEFAULT_POOL_SIZE: usize = 50;
pub const DEFAULT_DIVERSITY_LAMBDA: f64 = 0.0;
pub const DEFAULT_MAX_K: usize = 100;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalParams {
    /// Candidates fetched per source before MMR and score joining.
    pub pool_size: usize,
    /// MMR trade-off: `1.0` pure relevance, `0.0` maximum diversity.
    pub diversity_lambda: f64,
    /// Largest `total_k` a caller may request.
    pub max_k: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            diversity_lambda: DEFAULT_DIVERSITY_LAMBDA,
            max_k: DEFAULT_MAX_K,
        }
    }
}

impl RetrievalParams {
    /// Reject a result count above `max_k`.
    pub fn check_total_k(&self, total_k: usize) -> Result<()> {
        if total_k > self.max_k {
            return Err(RagError::InvalidQuery(format!(
                "k must be at most {}, got {}",
                self.max_k, total_k
            )));
        }
        Ok(())
    }
}

/// Embed `query` and run a source-balanced retrieval for `total_k` results.
pub async fn retrieve<S, E>(
    store: &S,
    embedder: &E,
    catalog: &SourceCatalog,
    params: &RetrievalParams,
    query: &str,
    total_k: usize,
) -> Result<Vec<RetrievedPassage>>
where
    S: VectorStore + ?Sized,
    E: Embedder + ?Sized,
{
    let query = query.trim();
    if query.is_empty() {
        return Err(RagError::InvalidQuery("query must not be empty".to_string()));
    }
    params.check_total_k(total_k)?;
    if total_k == 0 || catalog.weights().is_empty() {
        return Ok(Vec::new());
    }

    let query_vec = embedder.embed(query).await?;
    check_batch_shape(
        &[query.to_string()],
        std::slice::from_ref(&query_vec),
        embedder.dims(),
    )?;
    retrieve_by_vector(store, catalog, params, &query_vec, total_k).await
}

/// Source-balanced retrieval for a pre-computed query vector.
pub async fn retrieve_by_vector<S>(
    store: &S,
    catalog: &SourceCatalog,
    params: &RetrievalParams,
    query_vec: &[f32],
    total_k: usize,
) -> Result<Vec<RetrievedPassage>>
where
    S: VectorStore + ?Sized,
{
    params.check_total_k(total_k)?;
    if total_k == 0 {
        return Ok(Vec::new());
    }

    let weights = catalog.weights();
    let quota = allocate_from_weights(&weights, total_k);
    tracing::debug!(?quota, total_k, "allocated retrieval quotas");

    let candidates = gather_candidates(store, &quota, params, query_vec).await?;
    Ok(rank_candidates(candidates, &weights, total_k))
}

/// Fan out one pair of searches per source and concatenate the results in
/// quota (catalog) order.
async fn gather_candidates<S>(
    store: &S,
    quota: &RetrievalQuota,
    params: &RetrievalParams,
    query_vec: &[f32],
) -> Result<Vec<ScoredCandidate>>
where
    S: VectorStore + ?Sized,
{
    let searches = quota
        .entries()
        .iter()
        .filter(|(_, q)| *q > 0)
        .map(|(source, q)| source_candidates(store, params, query_vec, source, *q));

    let per_source = try_join_all(searches).await?;
    Ok(per_source.into_iter().flatten().collect())
}

async fn source_candidates<S>(
    store: &S,
    params: &RetrievalParams,
    query_vec: &[f32],
    source: &str,
    quota: usize,
) -> Result<Vec<ScoredCandidate>>
where
    S: VectorStore + ?Sized,
{
    let (diverse, scored) = try_join(
        store.diverse_neighbors(
            query_vec,
            quota,
            params.pool_size,
            params.diversity_lambda,
            Some(source),
        ),
        store.nearest_neighbors(query_vec, params.pool_size, Some(source)),
    )
    .await?;

    let scores: HashMap<&str, f64> = scored
        .iter()
        .map(|n| (n.passage.text.as_str(), n.similarity))
        .collect();

    tracing::debug!(
        source,
        quota,
        diverse = diverse.len(),
        pool = scored.len(),
        "source search complete"
    );

    Ok(diverse
        .into_iter()
        .map(|n| {
            let relevance = scores.get(n.passage.text.as_str()).copied().unwrap_or(0.0);
            ScoredCandidate {
                source_id: source.to_string(),
                relevance,
                passage: n.passage,
            }
        })
        .collect())
}

/// Boost, deduplicate by text, sort by boosted score, and truncate.
pub fn rank_candidates(
    candidates: Vec<ScoredCandidate>,
    weights: &SourceWeights,
    total_k: usize,
) -> Vec<RetrievedPassage> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut ranked: Vec<RetrievedPassage> = candidates
        .into_iter()
        .filter(|c| seen.insert(c.passage.text.clone()))
        .map(|c| RetrievedPassage {
            score: c.relevance * weights.boost(&c.source_id),
            source: c.source_id,
            content_hash: c.passage.content_hash,
            text: c.passage.text,
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(total_k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Neighbor, Passage, PassageCandidate};
    use crate::store::memory::InMemoryStore;
    use crate::testing::{BucketEmbedder, FixedEmbedder};
    use async_trait::async_trait;

    fn neighbor(text: &str, source: &str, vector: Vec<f32>, similarity: f64) -> Neighbor {
        Neighbor {
            passage: PassageCandidate::new(text, source).into_passage(vector),
            similarity,
        }
    }

    /// Store returning canned results per source, ignoring the query.
    #[derive(Default)]
    struct ScriptedStore {
        diverse: HashMap<String, Vec<Neighbor>>,
        nearest: HashMap<String, Vec<Neighbor>>,
        failing: Option<String>,
    }

    #[async_trait]
    impl VectorStore for ScriptedStore {
        async fn count(&self) -> Result<u64> {
            Ok(0)
        }

        async fn count_by_source(&self) -> Result<Vec<(String, u64)>> {
            Ok(Vec::new())
        }

        async fn existing_hashes(&self, _hashes: &[String]) -> Result<HashSet<String>> {
            Ok(HashSet::new())
        }

        async fn bulk_insert(&self, _passages: &[Passage]) -> Result<u64> {
            Ok(0)
        }

        async fn nearest_neighbors(
            &self,
            _query: &[f32],
            k: usize,
            source: Option<&str>,
        ) -> Result<Vec<Neighbor>> {
            let source = source.unwrap_or_default();
            if self.failing.as_deref() == Some(source) {
                return Err(RagError::timeout("nearest_neighbors", 5000));
            }
            let mut hits = self.nearest.get(source).cloned().unwrap_or_default();
            hits.truncate(k);
            Ok(hits)
        }

        async fn diverse_neighbors(
            &self,
            _query: &[f32],
            k: usize,
            _pool_size: usize,
            _diversity_lambda: f64,
            source: Option<&str>,
        ) -> Result<Vec<Neighbor>> {
            let mut hits = self
                .diverse
                .get(source.unwrap_or_default())
                .cloned()
                .unwrap_or_default();
            hits.truncate(k);
            Ok(hits)
        }
    }

    #[tokio::test]
    async fn test_same_text_from_two_sources_appears_once() {
        let shared_a = neighbor("shared passage text", "A", vec![1.0], 0.9);
        let shared_b = neighbor("shared passage text", "B", vec![1.0], 0.9);
        let mut store = ScriptedStore::default();
        store.diverse.insert("A".into(), vec![shared_a.clone()]);
        store.nearest.insert("A".into(), vec![shared_a]);
        store.diverse.insert(
            "B".into(),
            vec![shared_b.clone(), neighbor("only in b", "B", vec![1.0], 0.5)],
        );
        store.nearest.insert("B".into(), vec![shared_b]);

        let catalog = SourceCatalog::new([("A", 100), ("B", 100)]);
        let results = retrieve_by_vector(&store, &catalog, &RetrievalParams::default(), &[1.0], 4)
            .await
            .unwrap();

        let shared: Vec<_> = results
            .iter()
            .filter(|r| r.text == "shared passage text")
            .collect();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].source, "A");
    }

    #[tokio::test]
    async fn test_missing_score_defaults_to_zero() {
        let mut store = ScriptedStore::default();
        store.diverse.insert(
            "A".into(),
            vec![
                neighbor("scored", "A", vec![1.0], 0.7),
                neighbor("unscored", "A", vec![1.0], 0.7),
            ],
        );
        store
            .nearest
            .insert("A".into(), vec![neighbor("scored", "A", vec![1.0], 0.7)]);

        let catalog = SourceCatalog::new([("A", 10)]);
        let results = retrieve_by_vector(&store, &catalog, &RetrievalParams::default(), &[1.0], 2)
            .await
            .unwrap();

        assert_eq!(results[0].text, "scored");
        assert!((results[0].score - 0.7 * 2.0).abs() < 1e-9);
        assert_eq!(results[1].text, "unscored");
        assert_eq!(results[1].score, 0.0);
    }

    #[tokio::test]
    async fn test_failing_source_fails_whole_query() {
        let mut store = ScriptedStore::default();
        store
            .diverse
            .insert("A".into(), vec![neighbor("fine", "A", vec![1.0], 0.5)]);
        store.failing = Some("B".into());

        let catalog = SourceCatalog::new([("A", 10), ("B", 10)]);
        let err = retrieve_by_vector(&store, &catalog, &RetrievalParams::default(), &[1.0], 2)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::UpstreamTimeout { .. }));
    }

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        let mut passages = Vec::new();
        for i in 0..20 {
            let angle = i as f32 * 0.02;
            passages.push(
                PassageCandidate::new(format!("abundant passage number {}", i), "A")
                    .into_passage(vec![angle.cos(), angle.sin()]),
            );
        }
        passages.push(
            PassageCandidate::new("rare passage about grief", "B")
                .into_passage(vec![0.8, 0.6]),
        );
        store.bulk_insert(&passages).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_rare_source_reaches_final_output() {
        let store = seeded_store().await;
        let catalog = SourceCatalog::new([("A", 1000), ("B", 10)]);
        let embedder = FixedEmbedder::new(vec![1.0, 0.0]);

        let results = retrieve(
            &store,
            &embedder,
            &catalog,
            &RetrievalParams::default(),
            "how do I cope",
            5,
        )
        .await
        .unwrap();

        assert!(results.len() <= 5);
        assert!(results.iter().any(|r| r.source == "B"));
    }

    #[tokio::test]
    async fn test_returns_fewer_when_candidates_run_out() {
        let store = seeded_store().await;
        let catalog = SourceCatalog::new([("A", 1000), ("B", 10)]);

        // Quotas are A=1, B=4 but B holds a single passage.
        let results = retrieve_by_vector(&store, &catalog, &RetrievalParams::default(), &[1.0, 0.0], 5)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);

        // Balanced quotas of 20 each: A fills its share, B still has one.
        let balanced = SourceCatalog::new([("A", 20), ("B", 20)]);
        let results = retrieve_by_vector(&store, &balanced, &RetrievalParams::default(), &[1.0, 0.0], 40)
            .await
            .unwrap();
        assert_eq!(results.len(), 21);
    }

    #[tokio::test]
    async fn test_never_exceeds_total_k() {
        let store = seeded_store().await;
        let catalog = SourceCatalog::new([("A", 20), ("B", 20)]);
        for k in 1..=10 {
            let results = retrieve_by_vector(&store, &catalog, &RetrievalParams::default(), &[1.0, 0.0], k)
                .await
                .unwrap();
            assert!(results.len() <= k, "k={} got {}", k, results.len());
        }
    }

    #[tokio::test]
    async fn test_results_sorted_by_boosted_score() {
        let store = seeded_store().await;
        let catalog = SourceCatalog::new([("A", 20), ("B", 20)]);
        let results = retrieve_by_vector(&store, &catalog, &RetrievalParams::default(), &[1.0, 0.0], 8)
            .await
            .unwrap();
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let store = InMemoryStore::new();
        let embedder = FixedEmbedder::new(vec![1.0]);
        let catalog = SourceCatalog::new([("A", 1)]);
        let err = retrieve(&store, &embedder, &catalog, &RetrievalParams::default(), "   ", 5)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidQuery(_)));
    }

    /// Claims more dimensions than it returns.
    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        fn model_name(&self) -> &str {
            "short"
        }

        fn dims(&self) -> usize {
            3
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_query_vector_with_wrong_dims_is_rejected() {
        let store = seeded_store().await;
        let catalog = SourceCatalog::new([("A", 20), ("B", 20)]);
        let err = retrieve(&store, &ShortEmbedder, &catalog, &RetrievalParams::default(), "q", 3)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::UpstreamFailure { .. }));
        assert!(err.to_string().contains("expected 3 dimensions"));
    }

    #[tokio::test]
    async fn test_k_above_max_is_invalid_query() {
        let store = seeded_store().await;
        let embedder = BucketEmbedder::new(2);
        let catalog = SourceCatalog::new([("A", 3), ("B", 3)]);
        let params = RetrievalParams {
            max_k: 10,
            ..Default::default()
        };

        let err = retrieve(&store, &embedder, &catalog, &params, "q", usize::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidQuery(_)));
        assert_eq!(embedder.calls(), 0);

        let err = retrieve_by_vector(&store, &catalog, &params, &[1.0, 0.0], 11)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidQuery(_)));
        assert!(retrieve_by_vector(&store, &catalog, &params, &[1.0, 0.0], 10)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_zero_k_or_empty_catalog_returns_nothing() {
        let store = seeded_store().await;
        let embedder = FixedEmbedder::new(vec![1.0, 0.0]);
        let params = RetrievalParams::default();

        let catalog = SourceCatalog::new([("A", 10)]);
        assert!(retrieve(&store, &embedder, &catalog, &params, "q", 0)
            .await
            .unwrap()
            .is_empty());

        let empty = SourceCatalog::new([("A", 0)]);
        assert!(retrieve(&store, &embedder, &empty, &params, "q", 5)
            .await
            .unwrap()
            .is_empty());
    }
}
