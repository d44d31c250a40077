use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub source: Option<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    /// Preferred split boundary: `"paragraph"` or `"sentence"`.
    #[serde(default = "default_boundary")]
    pub boundary: String,
    /// Fraction of `max_tokens` the chunker may undershoot while looking
    /// for a clean boundary before falling back to a hard split.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap_tokens(),
            boundary: default_boundary(),
            tolerance: default_tolerance(),
        }
    }
}

fn default_max_tokens() -> usize {
    512
}
fn default_overlap_tokens() -> usize {
    64
}
fn default_boundary() -> String {
    "paragraph".to_string()
}
fn default_tolerance() -> f64 {
    0.25
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Rank fusion strategy: `"weighted"` (min-max + alpha blend) or `"rrf"`.
    #[serde(default = "default_fusion")]
    pub fusion: String,
    /// Weight for the vector channel: `fused = α·vector + (1-α)·lexical`.
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    /// Candidates fetched from each channel before fusion.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    /// Results returned when the caller does not specify k.
    #[serde(default = "default_k")]
    pub default_k: usize,
    /// RRF smoothing parameter (Cormack et al., 2009).
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,
    /// BM25 term-frequency saturation, used by the in-memory lexical index.
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f64,
    /// BM25 length normalization, used by the in-memory lexical index.
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f64,
    /// Deadline for each sub-search (the vector path includes an embedding
    /// API call, so this is deliberately generous).
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fusion: default_fusion(),
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k: default_candidate_k(),
            default_k: default_k(),
            rrf_k: default_rrf_k(),
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

fn default_fusion() -> String {
    "weighted".to_string()
}
fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> usize {
    80
}
fn default_k() -> usize {
    10
}
fn default_rrf_k() -> u32 {
    60
}
fn default_bm25_k1() -> f64 {
    1.2
}
fn default_bm25_b() -> f64 {
    0.75
}
fn default_search_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Global ceiling on concurrent embedding API calls, shared by
    /// ingestion workers and the query path.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Base delay of the exponential backoff between retries.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Cooldown applied after a rate-limit response with no Retry-After.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            max_concurrent: default_max_concurrent(),
            backoff_base_ms: default_backoff_base_ms(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_concurrent() -> usize {
    4
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_cooldown_ms() -> u64 {
    2000
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Documents processed concurrently by the ingestion worker pool.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8319".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.html".to_string(),
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
    ]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }
    match config.chunking.boundary.as_str() {
        "paragraph" | "sentence" => {}
        other => anyhow::bail!("Unknown chunking.boundary: '{}'. Use paragraph or sentence.", other),
    }
    if !(0.0..1.0).contains(&config.chunking.tolerance) {
        anyhow::bail!("chunking.tolerance must be in [0.0, 1.0)");
    }

    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if config.retrieval.default_k < 1 {
        anyhow::bail!("retrieval.default_k must be >= 1");
    }
    match config.retrieval.fusion.as_str() {
        "weighted" | "rrf" => {}
        other => anyhow::bail!("Unknown retrieval.fusion: '{}'. Use weighted or rrf.", other),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.max_concurrent == 0 {
            anyhow::bail!("embedding.max_concurrent must be > 0");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.ingest.workers == 0 {
        anyhow::bail!("ingest.workers must be > 0");
    }

    Ok(config)
}
