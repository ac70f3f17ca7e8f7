//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to the defaults
//! the pipeline was tuned with (5 MiB file cap, 20/4000-character chunk
//! bounds, the binary/media denylist).

use anyhow::{Context, Result};
use globset::Glob;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use repo_context_core::chunk::{ChunkLimits, MAX_CHUNK_CHARS, MAX_FILE_BYTES, MIN_CHUNK_CHARS};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("./repo_clones")
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitConfig {
    #[serde(default = "default_git_program")]
    pub program: String,
    #[serde(default)]
    pub shallow: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            program: default_git_program(),
            shallow: false,
        }
    }
}

fn default_git_program() -> String {
    "git".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "default_denied_extensions")]
    pub denied_extensions: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,
    #[serde(default = "default_index_timeout_secs")]
    pub index_timeout_secs: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            min_chunk_chars: default_min_chunk_chars(),
            max_chunk_chars: default_max_chunk_chars(),
            denied_extensions: default_denied_extensions(),
            exclude_globs: Vec::new(),
            sync_timeout_secs: default_sync_timeout_secs(),
            index_timeout_secs: default_index_timeout_secs(),
        }
    }
}

impl IndexingConfig {
    pub fn chunk_limits(&self) -> ChunkLimits {
        ChunkLimits {
            min_chars: self.min_chunk_chars,
            max_chars: self.max_chunk_chars,
        }
    }
}

fn default_max_file_bytes() -> u64 {
    MAX_FILE_BYTES
}
fn default_min_chunk_chars() -> usize {
    MIN_CHUNK_CHARS
}
fn default_max_chunk_chars() -> usize {
    MAX_CHUNK_CHARS
}
fn default_sync_timeout_secs() -> u64 {
    600
}
fn default_index_timeout_secs() -> u64 {
    1800
}

/// Images, executables, archives, compiled objects, office documents,
/// lock files, and environment files.
pub fn default_denied_extensions() -> Vec<String> {
    [
        "png", "jpg", "jpeg", "gif", "bmp", "ico", "svg", "lock", "bin", "exe", "dll", "so",
        "dylib", "zip", "gz", "tar", "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "o", "a",
        "obj", "class", "env",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for HTTP providers (Ollama).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
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

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;

    config.indexing.denied_extensions = config
        .indexing
        .denied_extensions
        .iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect();

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let indexing = &config.indexing;
    if indexing.max_file_bytes == 0 {
        anyhow::bail!("indexing.max_file_bytes must be > 0");
    }
    if indexing.min_chunk_chars == 0 {
        anyhow::bail!("indexing.min_chunk_chars must be > 0");
    }
    if indexing.min_chunk_chars > indexing.max_chunk_chars {
        anyhow::bail!(
            "indexing.min_chunk_chars ({}) must be <= indexing.max_chunk_chars ({})",
            indexing.min_chunk_chars,
            indexing.max_chunk_chars
        );
    }
    if indexing.sync_timeout_secs == 0 || indexing.index_timeout_secs == 0 {
        anyhow::bail!("indexing timeouts must be > 0");
    }
    for pattern in &indexing.exclude_globs {
        Glob::new(pattern)
            .with_context(|| format!("Invalid indexing.exclude_globs pattern: '{}'", pattern))?;
    }

    if config.git.program.trim().is_empty() {
        anyhow::bail!("git.program must not be empty");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
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
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    Ok(())
}
