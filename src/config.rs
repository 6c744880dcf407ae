use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pkb: PkbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub ask: AskConfig,
}

/// Storage locations and logging
#[derive(Debug, Clone, Deserialize)]
pub struct PkbConfig {
    /// Directory holding the metadata store and the content index.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for PkbConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            log_level: default_log_level(),
        }
    }
}

/// Walker filters and splitter parameters
///
/// `chunk_size` and `chunk_overlap` feed the chunk ids; changing them on an
/// existing deployment re-chunks every file whose content changes afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_supported_extensions")]
    pub supported_extensions: Vec<String>,
    #[serde(default = "default_ignore_directories")]
    pub ignore_directories: Vec<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            supported_extensions: default_supported_extensions(),
            ignore_directories: default_ignore_directories(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

/// Which LLM backs `pkb ask`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmKind {
    Fake,
    OpenAi,
}

/// Retrieval and generation settings
#[derive(Debug, Clone, Deserialize)]
pub struct AskConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_llm")]
    pub llm: LlmKind,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

impl Default for AskConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            llm: default_llm(),
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cache/pkb")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_supported_extensions() -> Vec<String> {
    ["txt", "md", "json", "yaml", "yml", "csv", "tsv", "xml", "py"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_ignore_directories() -> Vec<String> {
    [
        ".git",
        "__pycache__",
        "node_modules",
        "venv",
        ".venv",
        ".env",
        ".idea",
        ".vscode",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_k() -> usize {
    5
}

fn default_llm() -> LlmKind {
    LlmKind::OpenAi
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_top_p() -> f32 {
    0.95
}

fn default_max_retries() -> usize {
    3
}

impl Config {
    /// Load configuration
    ///
    /// Loads environment variables from .env file (if present) first.
    /// Looks for the config file in this order:
    /// 1. Path specified in the PKB_CONFIG environment variable (must exist)
    /// 2. ./config.toml in the current directory (optional)
    ///
    /// Falls back to built-in defaults when neither is present.
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config = match std::env::var("PKB_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => {
                let local = PathBuf::from("config.toml");
                if local.exists() {
                    Self::from_file(&local)?
                } else {
                    log::debug!("No config file found, using defaults");
                    Config::default()
                }
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without consulting the environment
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.ingest.chunk_size == 0 {
            anyhow::bail!("ingest.chunk_size must be greater than 0");
        }

        if self.ingest.chunk_overlap >= self.ingest.chunk_size {
            anyhow::bail!("ingest.chunk_overlap must be less than chunk_size");
        }

        if self.ingest.supported_extensions.is_empty() {
            anyhow::bail!("ingest.supported_extensions must list at least one extension");
        }

        if self.ask.k == 0 {
            anyhow::bail!("ask.k must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.ask.top_p) {
            anyhow::bail!("ask.top_p must be between 0.0 and 1.0");
        }

        Ok(())
    }

    /// Path of the metadata store database
    pub fn metadata_db_path(&self) -> PathBuf {
        self.pkb.cache_dir.join("filecache.db")
    }

    /// Path of the content index database
    pub fn index_db_path(&self) -> PathBuf {
        self.pkb.cache_dir.join("content_index.db")
    }
}
