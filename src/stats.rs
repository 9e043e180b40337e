//! Database statistics.
//!
//! `brag stats` prints the stored passage total, then one row per source
//! with the stored count next to the size configured in the retrieval
//! catalog. Catalog sources with nothing stored yet are listed too.

use anyhow::Result;

use balanced_rag_core::store::VectorStore;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

struct SourceStats {
    source: String,
    stored: u64,
    catalog: Option<u64>,
    last_insert_ts: Option<i64>,
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let total = store.count().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Balanced RAG - Database Stats");
    println!("=============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Passages:    {} / {} cap", total, config.ingest.max_total_docs);

    let mut stats: Vec<SourceStats> = store
        .source_stats()
        .await?
        .into_iter()
        .map(|row| {
            let catalog = config
                .retrieval
                .catalog
                .iter()
                .find(|e| e.source == row.source)
                .map(|e| e.count);
            SourceStats {
                source: row.source,
                stored: row.stored,
                catalog,
                last_insert_ts: row.last_insert,
            }
        })
        .collect();

    for entry in &config.retrieval.catalog {
        if !stats.iter().any(|s| s.source == entry.source) {
            stats.push(SourceStats {
                source: entry.source.clone(),
                stored: 0,
                catalog: Some(entry.count),
                last_insert_ts: None,
            });
        }
    }

    if !stats.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<36} {:>8} {:>8}   {}",
            "SOURCE", "STORED", "CATALOG", "LAST INSERT"
        );
        println!("  {}", "-".repeat(72));

        for s in &stats {
            let catalog = s
                .catalog
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            let last = match s.last_insert_ts {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<36} {:>8} {:>8}   {}",
                s.source, s.stored, catalog, last
            );
        }
    }

    println!();

    store.pool().close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
