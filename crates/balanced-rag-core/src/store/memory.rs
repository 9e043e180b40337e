//! In-memory [`VectorStore`] implementation for tests and small corpora.
//!
//! Passages live in a `Vec` behind `std::sync::RwLock`; a `HashSet` of
//! content hashes enforces uniqueness. Search is brute-force cosine
//! similarity over every stored vector.

use std::collections::{BTreeMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::models::{Neighbor, Passage};

use super::{rank_neighbors, VectorStore};

#[derive(Default)]
struct Inner {
    passages: Vec<Passage>,
    hashes: HashSet<String>,
}

/// In-memory store keyed by content hash.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| RagError::upstream("memory store", "lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| RagError::upstream("memory store", "lock poisoned"))
    }

    /// Snapshot of every stored passage, in insertion order.
    pub fn passages(&self) -> Result<Vec<Passage>> {
        Ok(self.read()?.passages.clone())
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn count(&self) -> Result<u64> {
        Ok(self.read()?.passages.len() as u64)
    }

    async fn count_by_source(&self) -> Result<Vec<(String, u64)>> {
        let inner = self.read()?;
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for p in &inner.passages {
            *counts.entry(p.source_id.clone()).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn existing_hashes(&self, hashes: &[String]) -> Result<HashSet<String>> {
        let inner = self.read()?;
        Ok(hashes
            .iter()
            .filter(|h| inner.hashes.contains(h.as_str()))
            .cloned()
            .collect())
    }

    async fn bulk_insert(&self, passages: &[Passage]) -> Result<u64> {
        let mut inner = self.write()?;
        let mut inserted = 0u64;
        for p in passages {
            if inner.hashes.insert(p.content_hash.clone()) {
                inner.passages.push(p.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn nearest_neighbors(
        &self,
        query: &[f32],
        k: usize,
        source: Option<&str>,
    ) -> Result<Vec<Neighbor>> {
        let inner = self.read()?;
        let neighbors: Vec<Neighbor> = inner
            .passages
            .iter()
            .filter(|p| source.map_or(true, |s| p.source_id == s))
            .map(|p| Neighbor {
                passage: p.clone(),
                similarity: cosine_similarity(query, &p.vector) as f64,
            })
            .collect();
        Ok(rank_neighbors(neighbors, k))
    }
}
