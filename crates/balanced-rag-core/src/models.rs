//! Core data models for passages and retrieval results.
//!
//! A [`Passage`] is written once by the ingestion pipeline and never
//! updated; its [`content_hash`] is the uniqueness key in every store.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Compute the deterministic fingerprint of a passage text.
///
/// SHA-256 over the UTF-8 bytes, hex encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// A normalized, validated text awaiting vectorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassageCandidate {
    pub text: String,
    pub source_id: String,
}

impl PassageCandidate {
    pub fn new(text: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
        }
    }

    pub fn content_hash(&self) -> String {
        content_hash(&self.text)
    }

    /// Attach the vector produced by the embedding gateway.
    pub fn into_passage(self, vector: Vec<f32>) -> Passage {
        Passage {
            content_hash: content_hash(&self.text),
            text: self.text,
            source_id: self.source_id,
            vector,
        }
    }
}

/// One stored unit of text plus its vector and source tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub content_hash: String,
    pub text: String,
    pub source_id: String,
    pub vector: Vec<f32>,
}

/// A stored passage paired with its cosine similarity to a query vector.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub passage: Passage,
    pub similarity: f64,
}

/// A passage selected for one query, before boosting.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub passage: Passage,
    pub relevance: f64,
    pub source_id: String,
}

/// A passage returned by the retriever, with its boosted score.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedPassage {
    pub text: String,
    pub source: String,
    pub content_hash: String,
    pub score: f64,
}
