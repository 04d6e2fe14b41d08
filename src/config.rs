use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::retrieval::DEFAULT_TOP_K;

/// System instruction used when none is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a rate my professor agent to help students find classes. For every user question, \
the top professors matching the query are returned. Use them to answer the question if relevant.";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RagConfig {
    pub server: ServerConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub completion: CompletionConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    pub provider: String,
    pub name: String,
    pub namespace: String,
    /// Data-plane host. Resolved through the control plane when empty.
    pub host: String,
    pub control_url: String,
    pub api_key: String,
    pub api_version: String,
    pub metric: String,
    pub cloud: String,
    pub region: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CompletionConfig {
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub connect_timeout_secs: u64,
    /// Longest silence tolerated between two chunks of a streamed answer.
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub system_prompt: String,
    pub id_label: String,
    pub metadata_fields: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            log_level: "info".into(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "text-embedding-3-small".into(),
            dimensions: 1536,
            base_url: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            provider: "pinecone".into(),
            name: "rag".into(),
            namespace: "ns1".into(),
            host: String::new(),
            control_url: "https://api.pinecone.io".into(),
            api_key: String::new(),
            api_version: "2024-07".into(),
            metric: "cosine".into(),
            cloud: "aws".into(),
            region: "us-east-1".into(),
            timeout_secs: 30,
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-3.5-turbo".into(),
            base_url: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            temperature: None,
            max_tokens: None,
            connect_timeout_secs: 10,
            idle_timeout_secs: 60,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            id_label: "Professor".into(),
            metadata_fields: vec!["review".into(), "subject".into(), "stars".into()],
        }
    }
}

/// Returns `~/.ragline/`
pub fn default_ragline_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ragline"))
}

/// Returns the default config file path: `~/.ragline/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    default_ragline_dir().map(|dir| dir.join("config.toml"))
}

impl RagConfig {
    /// Load config from the default TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        match default_config_path() {
            Some(path) => Self::load_from(path),
            None => {
                info!("no home directory, using default config");
                let mut config = RagConfig::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            RagConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (RAGLINE_*, OPENAI_API_KEY, PINECONE_API_KEY).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("RAGLINE_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("RAGLINE_HOST") {
            self.server.host = val;
        }
        if let Some(port) = parse_env("RAGLINE_PORT") {
            self.server.port = port;
        }
        if let Ok(val) = std::env::var("RAGLINE_INDEX_HOST") {
            self.index.host = val;
        }
        if let Ok(val) = std::env::var("RAGLINE_NAMESPACE") {
            self.index.namespace = val;
        }
        if let Some(top_k) = parse_env("RAGLINE_TOP_K") {
            self.retrieval.top_k = top_k;
        }
        if let Ok(val) = std::env::var("OPENAI_API_KEY") {
            self.embedding.api_key = val.clone();
            self.completion.api_key = val;
        }
        if let Ok(val) = std::env::var("PINECONE_API_KEY") {
            self.index.api_key = val;
        }
    }

    /// Reject settings no request could succeed with.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.retrieval.top_k > 0, "retrieval.top_k must be at least 1");
        anyhow::ensure!(
            self.embedding.dimensions > 0,
            "embedding.dimensions must be at least 1"
        );
        anyhow::ensure!(!self.index.namespace.is_empty(), "index.namespace must not be empty");
        Ok(())
    }

    /// `host:port` the HTTP server binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
