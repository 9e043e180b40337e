//! Capped, idempotent ingestion pipeline.
//!
//! Drives every configured [`Dataset`] through normalization and
//! validation, drops candidates that repeat an earlier one or are already
//! stored, truncates the rest to the remaining budget, then embeds and
//! stores them in batches:
//!
//! ```text
//! count ─▶ cap check ─▶ load+normalize+validate ─▶ drop known ─▶ truncate ─▶ [embed ─▶ bulk insert]*
//! ```
//!
//! A run that fails midway, or a repeated run over the same input, can
//! always be re-invoked: it recomputes the existing count and fills the new
//! remaining budget with passages not stored yet. The store still skips
//! known content hashes on insert.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::embedding::{check_batch_shape, Embedder};
use crate::error::Result;
use crate::models::PassageCandidate;
use crate::normalize::{Normalizer, Record};
use crate::store::VectorStore;
use crate::validate::check_content;

pub const DEFAULT_MAX_TOTAL_DOCS: u64 = 11163;
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// One source of raw records plus the rule that normalizes them.
pub trait Dataset: Send + Sync {
    /// Identifier stored with every passage from this dataset.
    fn source_id(&self) -> &str;

    /// Read every record, in the dataset's own order.
    fn load(&self) -> Result<Vec<Record>>;

    fn normalizer(&self) -> &dyn Normalizer;
}

/// A dataset whose records are already in memory.
pub struct InlineDataset {
    source_id: String,
    records: Vec<Record>,
    normalizer: Arc<dyn Normalizer>,
}

impl InlineDataset {
    pub fn new(
        source_id: impl Into<String>,
        records: Vec<Record>,
        normalizer: Arc<dyn Normalizer>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            records,
            normalizer,
        }
    }
}

impl Dataset for InlineDataset {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn load(&self) -> Result<Vec<Record>> {
        Ok(self.records.clone())
    }

    fn normalizer(&self) -> &dyn Normalizer {
        self.normalizer.as_ref()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    /// Upper bound on the total number of stored passages.
    pub max_total_docs: u64,
    /// Texts per embedding call and per bulk insert.
    pub batch_size: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_total_docs: DEFAULT_MAX_TOTAL_DOCS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Per-dataset outcome of normalization and validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceTally {
    pub source: String,
    pub records: usize,
    /// Records whose combined text was empty.
    pub empty: usize,
    pub rejected: usize,
    pub valid: usize,
}

/// The candidates an ingestion run would embed, before any upstream call.
#[derive(Debug, Clone, Default)]
pub struct IngestPlan {
    pub existing: u64,
    pub remaining: u64,
    pub sources: Vec<SourceTally>,
    /// Valid candidates repeating the text of an earlier one.
    pub duplicates: usize,
    /// Valid candidates whose content hash is already stored.
    pub already_stored: usize,
    /// New candidates in dataset order, truncated to `remaining`.
    pub candidates: Vec<PassageCandidate>,
}

impl IngestPlan {
    pub fn is_capped(&self) -> bool {
        self.remaining == 0
    }
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub existing: u64,
    pub remaining: u64,
    pub sources: Vec<SourceTally>,
    pub duplicates: usize,
    pub already_stored: usize,
    /// Candidates kept after truncation.
    pub kept: usize,
    /// Rows newly written to the store.
    pub inserted: u64,
    /// Kept candidates the store skipped on insert, e.g. because another
    /// writer stored the same text in the meantime.
    pub skipped: u64,
    pub batches: usize,
}

/// Normalize and validate every dataset, preserving dataset order and each
/// dataset's record order.
pub fn collect_candidates(
    datasets: &[Box<dyn Dataset>],
) -> Result<(Vec<PassageCandidate>, Vec<SourceTally>)> {
    let mut candidates = Vec::new();
    let mut tallies = Vec::with_capacity(datasets.len());

    for dataset in datasets {
        let source = dataset.source_id();
        let records = dataset.load()?;
        let mut tally = SourceTally {
            source: source.to_string(),
            records: records.len(),
            ..Default::default()
        };

        for record in &records {
            let Some(candidate) = dataset.normalizer().normalize(record, source) else {
                tally.empty += 1;
                continue;
            };
            match check_content(&candidate.text) {
                Ok(()) => {
                    tally.valid += 1;
                    candidates.push(candidate);
                }
                Err(reason) => {
                    tracing::trace!(source, %reason, "candidate rejected");
                    tally.rejected += 1;
                }
            }
        }

        tracing::info!(
            source,
            records = tally.records,
            valid = tally.valid,
            rejected = tally.rejected,
            total_so_far = candidates.len(),
            "parsed dataset"
        );
        tallies.push(tally);
    }

    Ok((candidates, tallies))
}

/// Steps 1–5 of ingestion: count, cap, collect, drop known, truncate.
///
/// Datasets are not read at all when the store is already at its cap.
pub async fn plan_ingest<S>(
    store: &S,
    datasets: &[Box<dyn Dataset>],
    options: &IngestOptions,
) -> Result<IngestPlan>
where
    S: VectorStore + ?Sized,
{
    let existing = store.count().await?;
    tracing::info!(existing, cap = options.max_total_docs, "passages already stored");

    if existing >= options.max_total_docs {
        tracing::info!(cap = options.max_total_docs, "cap reached, skipping ingest");
        return Ok(IngestPlan {
            existing,
            ..Default::default()
        });
    }

    let remaining = options.max_total_docs - existing;
    tracing::info!(remaining, "ingesting up to remaining budget");

    let (collected, sources) = collect_candidates(datasets)?;
    let valid = collected.len();

    let mut seen: HashSet<String> = HashSet::with_capacity(valid);
    let unique: Vec<(String, PassageCandidate)> = collected
        .into_iter()
        .map(|c| (c.content_hash(), c))
        .filter(|(hash, _)| seen.insert(hash.clone()))
        .collect();
    let duplicates = valid - unique.len();

    let hashes: Vec<String> = unique.iter().map(|(hash, _)| hash.clone()).collect();
    let stored = store.existing_hashes(&hashes).await?;

    let mut candidates: Vec<PassageCandidate> = unique
        .into_iter()
        .filter(|(hash, _)| !stored.contains(hash))
        .map(|(_, c)| c)
        .collect();
    let already_stored = stored.len();
    candidates.truncate(usize::try_from(remaining).unwrap_or(usize::MAX));

    tracing::info!(
        valid,
        duplicates,
        already_stored,
        kept = candidates.len(),
        "selected new candidates"
    );

    Ok(IngestPlan {
        existing,
        remaining,
        sources,
        duplicates,
        already_stored,
        candidates,
    })
}

/// Run the full ingestion pipeline.
///
/// Batches are embedded and inserted one at a time. The first failing batch
/// aborts the run; batches committed before it stay in the store.
pub async fn ingest<S, E>(
    store: &S,
    embedder: &E,
    datasets: &[Box<dyn Dataset>],
    options: &IngestOptions,
) -> Result<IngestReport>
where
    S: VectorStore + ?Sized,
    E: Embedder + ?Sized,
{
    let plan = plan_ingest(store, datasets, options).await?;
    let mut report = IngestReport {
        existing: plan.existing,
        remaining: plan.remaining,
        sources: plan.sources,
        duplicates: plan.duplicates,
        already_stored: plan.already_stored,
        kept: plan.candidates.len(),
        ..Default::default()
    };

    let batch_size = options.batch_size.max(1);
    let total = plan.candidates.len();
    let mut done = 0usize;

    for batch in plan.candidates.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        check_batch_shape(&texts, &vectors, embedder.dims())?;

        let passages: Vec<_> = batch
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(candidate, vector)| candidate.into_passage(vector))
            .collect();

        let inserted = store.bulk_insert(&passages).await?;
        report.inserted += inserted;
        report.skipped += passages.len() as u64 - inserted;
        report.batches += 1;
        done += passages.len();

        tracing::info!(
            batch = report.batches,
            inserted,
            done,
            total,
            "committed batch"
        );
    }

    Ok(report)
}
