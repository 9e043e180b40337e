//! `brag ingest`: run the ingestion pipeline over the configured datasets.
//!
//! Wires the SQLite store, the embedding gateway, and the file datasets
//! into [`balanced_rag_core::ingest`], then prints a summary. With
//! `--dry-run` only the plan is computed: nothing is embedded or written.

use anyhow::{bail, Result};

use balanced_rag_core::embedding::Embedder;
use balanced_rag_core::ingest::{ingest, plan_ingest, IngestOptions, IngestReport, SourceTally};
use balanced_rag_core::normalize::NormalizerRegistry;
use balanced_rag_core::store::VectorStore;

use crate::config::Config;
use crate::datasets::build_datasets;
use crate::embedding::create_embedder;
use crate::sqlite_store::SqliteStore;

/// Ingest every configured dataset into `store` using `embedder`.
pub async fn ingest_configured(
    config: &Config,
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    options: &IngestOptions,
) -> Result<IngestReport> {
    let datasets = build_datasets(config, &NormalizerRegistry::with_builtins())?;
    let report = ingest(store, embedder, &datasets, options).await?;
    tracing::info!(
        inserted = report.inserted,
        already_stored = report.already_stored,
        skipped = report.skipped,
        batches = report.batches,
        "ingest finished"
    );
    Ok(report)
}

pub async fn run_ingest(config: &Config, max_docs: Option<u64>, dry_run: bool) -> Result<()> {
    let mut options = config.ingest_options();
    if let Some(max_docs) = max_docs {
        if max_docs == 0 {
            bail!("--max-docs must be > 0");
        }
        options.max_total_docs = max_docs;
    }

    let store = SqliteStore::open(config).await?;

    if dry_run {
        let datasets = build_datasets(config, &NormalizerRegistry::with_builtins())?;
        let plan = plan_ingest(&store, &datasets, &options).await?;

        println!("ingest (dry-run)");
        println!("  existing: {}", plan.existing);
        println!("  remaining budget: {}", plan.remaining);
        if plan.is_capped() {
            println!("  store is at its cap; nothing to read");
        }
        print_sources(&plan.sources);
        if !plan.is_capped() {
            println!("  repeated in input: {}", plan.duplicates);
            println!("  already stored: {}", plan.already_stored);
        }
        println!("  would embed: {}", plan.candidates.len());
        store.pool().close().await;
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Ingest requires embeddings. Set [embedding] provider in config.");
    }
    let embedder = create_embedder(&config.embedding)?;
    let report = ingest_configured(config, &store, embedder.as_ref(), &options).await?;

    println!("ingest");
    println!("  existing: {}", report.existing);
    println!("  remaining budget: {}", report.remaining);
    print_sources(&report.sources);
    println!("  repeated in input: {}", report.duplicates);
    println!("  already stored: {}", report.already_stored);
    println!("  kept: {}", report.kept);
    println!("  inserted: {}", report.inserted);
    println!("  skipped on insert: {}", report.skipped);
    println!("  batches: {}", report.batches);
    println!("ok");

    store.pool().close().await;
    Ok(())
}

fn print_sources(sources: &[SourceTally]) {
    if sources.is_empty() {
        return;
    }
    println!(
        "  {:<36} {:>8} {:>8} {:>8}",
        "SOURCE", "RECORDS", "VALID", "REJECTED"
    );
    for s in sources {
        println!(
            "  {:<36} {:>8} {:>8} {:>8}",
            s.source, s.records, s.valid, s.rejected
        );
    }
}
