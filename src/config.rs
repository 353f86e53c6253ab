use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub structurer: StructurerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            structurer: StructurerConfig::default(),
            retrieval: RetrievalConfig::default(),
            ocr: OcrConfig::default(),
        }
    }
}

/// SQLite settings. Ingestion holds connections across several long
/// stages (LLM calls, embedding), so the pool size is tunable; WAL is the
/// default journal mode because uploads and questions write concurrently.
#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    /// Maximum connections in the pool.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Journal mode: `wal` (default) or `delete`.
    #[serde(default = "default_journal_mode")]
    pub journal_mode: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dochat.sqlite"),
            pool_size: default_pool_size(),
            journal_mode: default_journal_mode(),
        }
    }
}

fn default_pool_size() -> u32 {
    5
}
fn default_journal_mode() -> String {
    "wal".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Base URL used when synthesizing document access links
    /// (e.g. `http://localhost:8080`). No trailing slash.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            public_url: default_public_url(),
        }
    }
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

/// Generative model settings. The API key is read from the environment
/// variable named by `api_key_env`; a per-user key stored in the users
/// table takes precedence (see [`crate::llm`]).
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_embedding_endpoint(),
            model: default_embedding_model(),
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_embedding_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct StructurerConfig {
    /// Word-count budget per structuring LLM call. The estimate is
    /// whitespace word count, not a real tokenizer.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for StructurerConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    3000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of nearest-neighbor candidates fetched per question.
    #[serde(default = "default_k")]
    pub k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { k: default_k() }
    }
}

fn default_k() -> usize {
    5
}

/// External OCR tooling. Both binaries must be on PATH (or configured
/// with absolute paths) for image uploads and scanned-PDF fallback.
#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default = "default_tesseract")]
    pub tesseract_path: String,
    #[serde(default = "default_pdftoppm")]
    pub pdftoppm_path: String,
    #[serde(default = "default_languages")]
    pub languages: String,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract_path: default_tesseract(),
            pdftoppm_path: default_pdftoppm(),
            languages: default_languages(),
            dpi: default_dpi(),
        }
    }
}

fn default_tesseract() -> String {
    "tesseract".to_string()
}
fn default_pdftoppm() -> String {
    "pdftoppm".to_string()
}
fn default_languages() -> String {
    "eng".to_string()
}
fn default_dpi() -> u32 {
    300
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.db.pool_size == 0 {
        anyhow::bail!("db.pool_size must be >= 1");
    }

    if !matches!(config.db.journal_mode.as_str(), "wal" | "delete") {
        anyhow::bail!("db.journal_mode must be 'wal' or 'delete'");
    }

    if config.structurer.max_tokens == 0 {
        anyhow::bail!("structurer.max_tokens must be > 0");
    }

    if config.retrieval.k == 0 {
        anyhow::bail!("retrieval.k must be >= 1");
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }

    if config.server.public_url.ends_with('/') {
        anyhow::bail!("server.public_url must not end with '/'");
    }

    Ok(config)
}
