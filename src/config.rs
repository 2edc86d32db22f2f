//! TOML configuration.
//!
//! One file, one [`Config`]. Every section has serde defaults so a minimal
//! file only names the SharePoint source; [`load_config`] validates the
//! cross-field constraints after parsing. Secrets are never read from the
//! file: see [`SourceConfig::client_secret`] and the provider constructors.
//!
//! ```toml
//! [source]
//! tenant_id = "contoso.onmicrosoft.com"
//! client_id = "00000000-0000-0000-0000-000000000000"
//! site_url = "https://contoso.sharepoint.com/sites/Proposals"
//! folder_path = "/Knowledge Base"
//!
//! [index]
//! backend = "sqlite"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub state: StateConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Where the cursor, manifest, and local index live.
#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_cursor_file")]
    pub cursor_file: String,
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
            cursor_file: default_cursor_file(),
            manifest_file: default_manifest_file(),
        }
    }
}

impl StateConfig {
    pub fn cursor_path(&self) -> PathBuf {
        self.dir.join(&self.cursor_file)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(&self.manifest_file)
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_cursor_file() -> String {
    "delta_link.json".to_string()
}
fn default_manifest_file() -> String {
    "manifest.json".to_string()
}

/// SharePoint document library reached through Microsoft Graph.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourceConfig {
    /// Falls back to `SHAREPOINT_TENANT_ID`.
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Falls back to `SHAREPOINT_CLIENT_ID`.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub site_id: Option<String>,
    /// e.g. `https://contoso.sharepoint.com/sites/Proposals`
    #[serde(default)]
    pub site_url: Option<String>,
    #[serde(default)]
    pub drive_id: Option<String>,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub folder_path: Option<String>,
    #[serde(default = "default_graph_url")]
    pub graph_url: String,
    #[serde(default = "default_authority_url")]
    pub authority_url: String,
    /// `$top` for listing requests.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Stored as `metadata.source` on every vector.
    #[serde(default = "default_source_label")]
    pub label: String,
}

fn default_graph_url() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}
fn default_authority_url() -> String {
    "https://login.microsoftonline.com".to_string()
}
fn default_page_size() -> u32 {
    200
}
fn default_source_label() -> String {
    "sharepoint".to_string()
}

impl SourceConfig {
    pub fn tenant_id(&self) -> Result<String> {
        self.tenant_id
            .clone()
            .or_else(|| std::env::var("SHAREPOINT_TENANT_ID").ok())
            .filter(|s| !s.is_empty())
            .context("source.tenant_id is not set and SHAREPOINT_TENANT_ID is empty")
    }

    pub fn client_id(&self) -> Result<String> {
        self.client_id
            .clone()
            .or_else(|| std::env::var("SHAREPOINT_CLIENT_ID").ok())
            .filter(|s| !s.is_empty())
            .context("source.client_id is not set and SHAREPOINT_CLIENT_ID is empty")
    }

    pub fn client_secret(&self) -> Result<String> {
        std::env::var("SHAREPOINT_CLIENT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .context("SHAREPOINT_CLIENT_SECRET environment variable not set")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
    /// Files whose trimmed text is shorter than this are skipped.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_chunk_overlap(),
            min_text_chars: default_min_text_chars(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    100
}
fn default_min_text_chars() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `local`, `openai`, or `ollama`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Texts per embedding request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Base URL for `ollama` (and OpenAI-compatible gateways).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `pinecone`, `sqlite`, or `memory`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Vector dimensionality the index was created with.
    #[serde(default = "default_index_dims")]
    pub dims: usize,
    /// Pinecone index host, e.g. `https://docs-abc123.svc.pinecone.io`.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
    /// SQLite database path; defaults to `<state.dir>/vectors.sqlite`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            dims: default_index_dims(),
            host: None,
            namespace: None,
            upsert_batch_size: default_upsert_batch_size(),
            path: None,
        }
    }
}

fn default_backend() -> String {
    "pinecone".to_string()
}
fn default_index_dims() -> usize {
    384
}
fn default_upsert_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Stored as `metadata.knowledge_base` on every vector.
    #[serde(default = "default_knowledge_base")]
    pub knowledge_base: String,
    /// Remove vectors of deleted and orphaned files.
    #[serde(default = "default_true")]
    pub prune_deleted: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            knowledge_base: default_knowledge_base(),
            prune_deleted: true,
        }
    }
}

fn default_knowledge_base() -> String {
    "default".to_string()
}
fn default_true() -> bool {
    true
}

/// Uniform policy for every provider call.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fraction of each delay randomized, in `[0.0, 1.0]`.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_jitter() -> f64 {
    0.2
}
fn default_call_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Run a full sync when no cursor exists.
    #[serde(default = "default_true")]
    pub initial_full_sync: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_interval_secs(),
            initial_full_sync: true,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_interval_secs() -> u64 {
    3600
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
    "127.0.0.1:8080".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        bail!("chunking.overlap must be smaller than chunking.chunk_size");
    }

    if config.source.folder_id.is_none() && config.source.folder_path.is_none() {
        bail!("source.folder_id or source.folder_path must be set");
    }
    if config.source.site_id.is_none()
        && config.source.site_url.is_none()
        && config.source.drive_id.is_none()
    {
        bail!("one of source.site_id, source.site_url, or source.drive_id must be set");
    }

    match config.embedding.provider.as_str() {
        "local" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, or ollama.",
            other
        ),
    }
    if config.embedding.provider != "local" && config.embedding.model.is_none() {
        bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if let Some(dims) = config.embedding.dims {
        if dims != config.index.dims {
            bail!(
                "embedding.dims ({}) must equal index.dims ({})",
                dims,
                config.index.dims
            );
        }
    }

    match config.index.backend.as_str() {
        "pinecone" => {
            if config.index.host.is_none() {
                bail!("index.host must be set for the pinecone backend");
            }
        }
        "sqlite" | "memory" => {}
        other => bail!(
            "Unknown index backend: '{}'. Must be pinecone, sqlite, or memory.",
            other
        ),
    }
    if config.index.dims == 0 {
        bail!("index.dims must be > 0");
    }
    if config.index.upsert_batch_size == 0 {
        bail!("index.upsert_batch_size must be > 0");
    }

    if config.retry.max_attempts == 0 {
        bail!("retry.max_attempts must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retry.jitter) {
        bail!("retry.jitter must be in [0.0, 1.0]");
    }
    if config.retry.call_timeout_secs == 0 {
        bail!("retry.call_timeout_secs must be > 0");
    }

    if config.scheduler.interval_secs == 0 {
        bail!("scheduler.interval_secs must be > 0");
    }

    Ok(())
}
