//! Dataset file readers.
//!
//! A [`FileDataset`] reads one CSV or JSON file into [`Record`]s and pairs
//! it with the normalizer named in its `[[ingest.datasets]]` entry.
//!
//! - **CSV**: the first row is the header. Quoted fields are honored, rows
//!   may be ragged, and values are trimmed. Unreadable rows are logged and
//!   skipped.
//! - **JSON**: a top-level array of objects. String, number, and boolean
//!   fields become record fields; nulls, nested values, and non-object
//!   entries are ignored.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use serde_json::Value;

use balanced_rag_core::error::RagError;
use balanced_rag_core::ingest::Dataset;
use balanced_rag_core::normalize::{FieldJoin, Normalizer, NormalizerRegistry, Record};

use crate::config::{Config, DatasetConfig, DatasetFormat};

pub struct FileDataset {
    source_id: String,
    path: PathBuf,
    format: DatasetFormat,
    normalizer: Arc<dyn Normalizer>,
}

impl FileDataset {
    pub fn new(
        source_id: impl Into<String>,
        path: impl Into<PathBuf>,
        format: DatasetFormat,
        normalizer: Arc<dyn Normalizer>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            path: path.into(),
            format,
            normalizer,
        }
    }
}

impl Dataset for FileDataset {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn load(&self) -> balanced_rag_core::error::Result<Vec<Record>> {
        let records = match self.format {
            DatasetFormat::Csv => read_csv(&self.path),
            DatasetFormat::Json => read_json(&self.path),
        }
        .map_err(|e| RagError::Dataset(format!("{}: {}", self.path.display(), e)))?;

        tracing::debug!(
            source = %self.source_id,
            path = %self.path.display(),
            records = records.len(),
            "read dataset"
        );
        Ok(records)
    }

    fn normalizer(&self) -> &dyn Normalizer {
        self.normalizer.as_ref()
    }
}

fn read_csv(path: &Path) -> Result<Vec<Record>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut records = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(path = %path.display(), row = line + 1, error = %e, "skipping unreadable row");
                continue;
            }
        };
        let record: Record = headers
            .iter()
            .zip(row.iter())
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        records.push(record);
    }
    Ok(records)
}

fn read_json(path: &Path) -> Result<Vec<Record>> {
    let raw = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw)?;
    let Value::Array(entries) = value else {
        bail!("expected a top-level JSON array");
    };

    let mut records = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let Value::Object(fields) = entry else {
            tracing::warn!(path = %path.display(), index, "skipping non-object entry");
            continue;
        };
        let record: Record = fields
            .into_iter()
            .filter_map(|(name, value)| {
                let text = match value {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some((name, text))
            })
            .collect();
        records.push(record);
    }
    Ok(records)
}

/// Resolve the normalizer rule a dataset entry names.
pub fn resolve_normalizer(
    entry: &DatasetConfig,
    registry: &NormalizerRegistry,
) -> Result<Arc<dyn Normalizer>> {
    if let Some(name) = &entry.normalizer {
        return registry.get(name).ok_or_else(|| {
            anyhow::anyhow!(
                "dataset '{}': unknown normalizer '{}' (known: {})",
                entry.source,
                name,
                registry.names().join(", ")
            )
        });
    }

    let Some(fields) = &entry.fields else {
        bail!("dataset '{}': no normalizer or fields", entry.source);
    };
    let rule = entry
        .strip_markup
        .iter()
        .fold(FieldJoin::new(fields.iter().cloned()), |rule, field| {
            rule.strip_markup_from(field.clone())
        });
    Ok(Arc::new(rule))
}

/// Build every configured dataset, in configuration order.
pub fn build_datasets(
    config: &Config,
    registry: &NormalizerRegistry,
) -> Result<Vec<Box<dyn Dataset>>> {
    config
        .ingest
        .datasets
        .iter()
        .map(|entry| {
            let Some(format) = entry.resolved_format() else {
                bail!(
                    "dataset '{}': cannot infer format from {}",
                    entry.source,
                    entry.path.display()
                );
            };
            let normalizer = resolve_normalizer(entry, registry)?;
            Ok(Box::new(FileDataset::new(
                entry.source.clone(),
                entry.path.clone(),
                format,
                normalizer,
            )) as Box<dyn Dataset>)
        })
        .collect()
}
