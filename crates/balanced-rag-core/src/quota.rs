//! Per-source retrieval quotas from inverse catalog sizes.
//!
//! Raw nearest-neighbor search is dominated by the largest dataset. Each
//! source `s` with catalog size `count(s) > 0` gets the weight
//! `w(s) = 1 / count(s)`, so rarer sources receive proportionally larger
//! quotas. The same normalized weight reappears at scoring time as the
//! boost factor `1 + w(s) / Σw`.
//!
//! # Allocation
//!
//! 1. `quota(s) = max(1, round(K · w(s) / Σw))`.
//! 2. Underflow repair: while `Σquota < K`, increment the smallest quota
//!    (first in catalog order on ties).
//! 3. Overflow repair: while `Σquota > K`, decrement the largest quota
//!    (first in catalog order on ties) if it is above 1; otherwise stop,
//!    leaving the sum above `K`.

use serde::Serialize;

/// Static mapping from source id to its known total passage count.
///
/// Iteration order is the configured order and is used for tie-breaking.
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    entries: Vec<(String, u64)>,
}

impl SourceCatalog {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(|(s, c)| (s.into(), c)).collect(),
        }
    }

    pub fn entries(&self) -> &[(String, u64)] {
        &self.entries
    }

    /// Normalized inverse-size weights. Sources with a zero count are
    /// excluded entirely.
    pub fn weights(&self) -> SourceWeights {
        let raw: Vec<(String, f64)> = self
            .entries
            .iter()
            .filter(|(_, count)| *count > 0)
            .map(|(source, count)| (source.clone(), 1.0 / *count as f64))
            .collect();
        let sum: f64 = raw.iter().map(|(_, w)| w).sum();
        SourceWeights { raw, sum }
    }
}

/// Inverse-size weights for the sources that take part in weighting.
#[derive(Debug, Clone)]
pub struct SourceWeights {
    raw: Vec<(String, f64)>,
    sum: f64,
}

impl SourceWeights {
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// `w(s) / Σw`, or `None` if the source does not take part.
    pub fn share(&self, source: &str) -> Option<f64> {
        self.raw
            .iter()
            .find(|(s, _)| s == source)
            .map(|(_, w)| w / self.sum)
    }

    /// Score multiplier `1 + w(s) / Σw`; `1.0` for unknown sources.
    pub fn boost(&self, source: &str) -> f64 {
        1.0 + self.share(source).unwrap_or(0.0)
    }
}

/// Number of results each source contributes to one retrieval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetrievalQuota {
    entries: Vec<(String, usize)>,
}

impl RetrievalQuota {
    pub fn entries(&self) -> &[(String, usize)] {
        &self.entries
    }

    pub fn get(&self, source: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|(s, _)| s == source)
            .map(|(_, q)| *q)
    }

    pub fn total(&self) -> usize {
        saturating_total(&self.entries)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compute per-source quotas for a request of `total_k` results.
pub fn allocate_quotas(catalog: &SourceCatalog, total_k: usize) -> RetrievalQuota {
    allocate_from_weights(&catalog.weights(), total_k)
}

pub fn allocate_from_weights(weights: &SourceWeights, total_k: usize) -> RetrievalQuota {
    let mut entries: Vec<(String, usize)> = weights
        .raw
        .iter()
        .map(|(source, w)| {
            let ideal = (w / weights.sum * total_k as f64).round() as usize;
            (source.clone(), ideal.max(1))
        })
        .collect();

    if entries.is_empty() {
        return RetrievalQuota { entries };
    }

    let mut allocated = saturating_total(&entries);

    while allocated < total_k {
        let idx = first_extreme(&entries, |candidate, best| candidate < best);
        entries[idx].1 = entries[idx].1.saturating_add(1);
        allocated += 1;
    }

    while allocated > total_k {
        let idx = first_extreme(&entries, |candidate, best| candidate > best);
        if entries[idx].1 <= 1 {
            break;
        }
        entries[idx].1 -= 1;
        allocated -= 1;
    }

    RetrievalQuota { entries }
}

fn saturating_total(entries: &[(String, usize)]) -> usize {
    entries
        .iter()
        .fold(0usize, |acc, (_, q)| acc.saturating_add(*q))
}

/// Index of the first entry that no later entry strictly beats.
fn first_extreme(entries: &[(String, usize)], beats: impl Fn(usize, usize) -> bool) -> usize {
    let mut best = 0;
    for (i, (_, q)) in entries.iter().enumerate().skip(1) {
        if beats(*q, entries[best].1) {
            best = i;
        }
    }
    best
}
