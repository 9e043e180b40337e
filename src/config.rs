//! Configuration loading and validation.
//!
//! The configuration is a single TOML file. Every section except `[db]` has
//! serde defaults, so a minimal file only names the database path:
//!
//! ```toml
//! [db]
//! path = "./data/brag.sqlite"
//! ```
//!
//! [`load_config`] parses the file and rejects inconsistent settings before
//! any command touches the database or a gateway. API keys are never read
//! from the file; gateways take them from `OPENAI_API_KEY`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use balanced_rag_core::ingest::{IngestOptions, DEFAULT_BATCH_SIZE, DEFAULT_MAX_TOTAL_DOCS};
use balanced_rag_core::quota::SourceCatalog;
use balanced_rag_core::retrieve::{
    RetrievalParams, DEFAULT_DIVERSITY_LAMBDA, DEFAULT_MAX_K, DEFAULT_POOL_SIZE,
};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    /// Deadline for every store operation.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

fn default_store_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Retries on HTTP 429 only.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            base_url: default_base_url(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_base_url() -> String {
    DEFAULT_OPENAI_BASE_URL.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_completion_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_completion_model(),
            temperature: default_temperature(),
            timeout_ms: default_completion_timeout_ms(),
            base_url: default_base_url(),
        }
    }
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_completion_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_completion_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_total_docs")]
    pub max_total_docs: u64,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_total_docs: default_max_total_docs(),
            datasets: Vec::new(),
        }
    }
}

fn default_max_total_docs() -> u64 {
    DEFAULT_MAX_TOTAL_DOCS
}

/// One dataset file and the rule that turns its records into passages.
///
/// Exactly one of `normalizer` (a registered rule name) or `fields` (an
/// inline field join) must be set.
#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    pub source: String,
    pub path: PathBuf,
    #[serde(default)]
    pub format: Option<DatasetFormat>,
    #[serde(default)]
    pub normalizer: Option<String>,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    /// Fields whose markup is removed before joining. Only with `fields`.
    #[serde(default)]
    pub strip_markup: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFormat {
    Csv,
    Json,
}

impl DatasetConfig {
    /// The explicit format, or one inferred from the file extension.
    pub fn resolved_format(&self) -> Option<DatasetFormat> {
        if self.format.is_some() {
            return self.format;
        }
        match self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("csv") => Some(DatasetFormat::Csv),
            Some("json") => Some(DatasetFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    /// Largest `k` a query may ask for.
    #[serde(default = "default_max_k")]
    pub max_k: usize,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_diversity_lambda")]
    pub diversity_lambda: f64,
    /// Total passages per source, in source iteration order.
    #[serde(default)]
    pub catalog: Vec<CatalogEntry>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            max_k: default_max_k(),
            pool_size: default_pool_size(),
            diversity_lambda: default_diversity_lambda(),
            catalog: Vec::new(),
        }
    }
}

impl RetrievalConfig {
    pub fn source_catalog(&self) -> SourceCatalog {
        SourceCatalog::new(self.catalog.iter().map(|e| (e.source.clone(), e.count)))
    }

    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            pool_size: self.pool_size,
            diversity_lambda: self.diversity_lambda,
            max_k: self.max_k,
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_max_k() -> usize {
    DEFAULT_MAX_K
}
fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}
fn default_diversity_lambda() -> f64 {
    DEFAULT_DIVERSITY_LAMBDA
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogEntry {
    pub source: String,
    pub count: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Longest accepted `input`, in characters.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:4000".to_string()
}
fn default_max_input_chars() -> usize {
    500
}

impl Config {
    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            max_total_docs: self.ingest.max_total_docs,
            batch_size: self.embedding.batch_size,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Reject settings that would fail later at ingestion or query time.
pub fn validate(config: &Config) -> Result<()> {
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.ingest.max_total_docs == 0 {
        bail!("ingest.max_total_docs must be > 0");
    }
    if config.retrieval.default_k == 0 || config.retrieval.default_k > config.retrieval.max_k {
        bail!(
            "retrieval.default_k must be between 1 and retrieval.max_k ({})",
            config.retrieval.max_k
        );
    }
    if config.retrieval.pool_size == 0 {
        bail!("retrieval.pool_size must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.diversity_lambda) {
        bail!("retrieval.diversity_lambda must be in [0.0, 1.0]");
    }
    if config.server.max_input_chars == 0 {
        bail!("server.max_input_chars must be > 0");
    }

    let mut seen = HashSet::new();
    for dataset in &config.ingest.datasets {
        if !seen.insert(dataset.source.as_str()) {
            bail!("ingest.datasets: duplicate source '{}'", dataset.source);
        }
        match (&dataset.normalizer, &dataset.fields) {
            (Some(_), None) => {
                if !dataset.strip_markup.is_empty() {
                    bail!(
                        "ingest.datasets '{}': strip_markup requires fields",
                        dataset.source
                    );
                }
            }
            (None, Some(fields)) if fields.is_empty() => {
                bail!("ingest.datasets '{}': fields must not be empty", dataset.source);
            }
            (None, Some(_)) => {}
            _ => bail!(
                "ingest.datasets '{}': set exactly one of normalizer or fields",
                dataset.source
            ),
        }
        if dataset.resolved_format().is_none() {
            bail!(
                "ingest.datasets '{}': cannot infer format from {}; set format = \"csv\" or \"json\"",
                dataset.source,
                dataset.path.display()
            );
        }
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    for (key, provider) in [
        ("embedding", &config.embedding.provider),
        ("completion", &config.completion.provider),
    ] {
        match provider.as_str() {
            "disabled" | "openai" => {}
            other => bail!(
                "Unknown {} provider: '{}'. Must be disabled or openai.",
                key,
                other
            ),
        }
    }

    Ok(())
}
