//! Configuration loading and resolution
//!
//! Settings resolve with environment variables taking priority over the TOML
//! config file, which takes priority over compiled defaults. The TOML file is
//! looked up at `$DOCMILL_CONFIG`, then `~/.config/docmill/config.toml`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// On-disk TOML configuration (all fields optional; defaults applied on load)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    pub database_path: Option<String>,
    pub bind_port: Option<u16>,
    pub search_api_key: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_models: Option<Vec<String>>,
    pub local_llm_enabled: Option<bool>,
    pub local_llm_endpoint: Option<String>,
    pub local_llm_models: Option<Vec<String>>,
    pub sources_free: Option<u32>,
    pub sources_standard: Option<u32>,
    pub sources_premium: Option<u32>,
    pub poll_interval_secs: Option<u64>,
    pub poll_batch_size: Option<u32>,
    pub scrape_concurrency: Option<usize>,
    pub scrape_timeout_secs: Option<u64>,
    pub prompt_version: Option<String>,
}

/// Resolved runtime settings for the worker
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path to the sqlite database file
    pub database_path: PathBuf,
    /// HTTP bind port for the health/document endpoints
    pub bind_port: u16,
    /// Paid web-search API key (evidence cascade primary). None disables it.
    pub search_api_key: Option<String>,
    /// Hosted generation API key. None disables the hosted provider.
    pub llm_api_key: Option<String>,
    /// Hosted model candidates, tried in order
    pub llm_models: Vec<String>,
    /// Whether the self-hosted model server may be used at all
    pub local_llm_enabled: bool,
    /// Base URL of the self-hosted model server
    pub local_llm_endpoint: String,
    /// Self-hosted model candidates, tried in order
    pub local_llm_models: Vec<String>,
    /// Required source count per tier (free, standard, premium)
    pub sources_free: u32,
    pub sources_standard: u32,
    pub sources_premium: u32,
    /// Seconds between PENDING-job poll cycles
    pub poll_interval_secs: u64,
    /// How many of the oldest PENDING jobs each poll cycle submits
    pub poll_batch_size: u32,
    /// Parallel fetches during the research stage
    pub scrape_concurrency: usize,
    /// Per-fetch timeout during the research stage
    pub scrape_timeout_secs: u64,
    /// Prompt strategy version tag ("v1" or "v2")
    pub prompt_version: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("docmill.db"),
            bind_port: 5840,
            search_api_key: None,
            llm_api_key: None,
            llm_models: vec![
                "gpt-4o".to_string(),
                "gpt-4o-mini".to_string(),
            ],
            local_llm_enabled: false,
            local_llm_endpoint: "http://127.0.0.1:11434".to_string(),
            local_llm_models: vec!["llama3.1:8b".to_string()],
            sources_free: 3,
            sources_standard: 5,
            sources_premium: 8,
            poll_interval_secs: 4,
            poll_batch_size: 3,
            scrape_concurrency: 4,
            scrape_timeout_secs: 8,
            prompt_version: "v2".to_string(),
        }
    }
}

impl Settings {
    /// Load settings: ENV over TOML over defaults
    pub fn load() -> Result<Self> {
        let toml = load_toml_config()?;
        let mut s = Settings::default();

        if let Some(v) = toml.database_path {
            s.database_path = PathBuf::from(v);
        }
        if let Some(v) = toml.bind_port {
            s.bind_port = v;
        }
        s.search_api_key = toml.search_api_key;
        s.llm_api_key = toml.llm_api_key;
        if let Some(v) = toml.llm_models {
            s.llm_models = v;
        }
        if let Some(v) = toml.local_llm_enabled {
            s.local_llm_enabled = v;
        }
        if let Some(v) = toml.local_llm_endpoint {
            s.local_llm_endpoint = v;
        }
        if let Some(v) = toml.local_llm_models {
            s.local_llm_models = v;
        }
        if let Some(v) = toml.sources_free {
            s.sources_free = v;
        }
        if let Some(v) = toml.sources_standard {
            s.sources_standard = v;
        }
        if let Some(v) = toml.sources_premium {
            s.sources_premium = v;
        }
        if let Some(v) = toml.poll_interval_secs {
            s.poll_interval_secs = v;
        }
        if let Some(v) = toml.poll_batch_size {
            s.poll_batch_size = v;
        }
        if let Some(v) = toml.scrape_concurrency {
            s.scrape_concurrency = v;
        }
        if let Some(v) = toml.scrape_timeout_secs {
            s.scrape_timeout_secs = v;
        }
        if let Some(v) = toml.prompt_version {
            s.prompt_version = v;
        }

        s.apply_env_overrides();
        s.validate()?;
        Ok(s)
    }

    /// Apply environment-variable overrides (highest priority)
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DOCMILL_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("DOCMILL_BIND_PORT") {
            match v.parse() {
                Ok(port) => self.bind_port = port,
                Err(_) => warn!("Ignoring invalid DOCMILL_BIND_PORT: {}", v),
            }
        }
        if let Ok(v) = std::env::var("DOCMILL_SEARCH_API_KEY") {
            self.search_api_key = non_empty(v);
        }
        if let Ok(v) = std::env::var("DOCMILL_LLM_API_KEY") {
            self.llm_api_key = non_empty(v);
        }
        if let Ok(v) = std::env::var("DOCMILL_LLM_MODELS") {
            self.llm_models = split_list(&v);
        }
        if let Ok(v) = std::env::var("DOCMILL_LOCAL_LLM_ENABLED") {
            self.local_llm_enabled = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("DOCMILL_LOCAL_LLM_ENDPOINT") {
            self.local_llm_endpoint = v;
        }
        if let Ok(v) = std::env::var("DOCMILL_LOCAL_LLM_MODELS") {
            self.local_llm_models = split_list(&v);
        }
        if let Ok(v) = std::env::var("DOCMILL_POLL_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                self.poll_interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("DOCMILL_SCRAPE_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                self.scrape_concurrency = n;
            }
        }
        if let Ok(v) = std::env::var("DOCMILL_PROMPT_VERSION") {
            self.prompt_version = v;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(Error::Config("poll_interval_secs must be > 0".to_string()));
        }
        if self.poll_batch_size == 0 {
            return Err(Error::Config("poll_batch_size must be > 0".to_string()));
        }
        if self.scrape_concurrency == 0 {
            return Err(Error::Config("scrape_concurrency must be > 0".to_string()));
        }
        if self.llm_models.is_empty() {
            return Err(Error::Config("llm_models must not be empty".to_string()));
        }
        match self.prompt_version.as_str() {
            "v1" | "v2" => Ok(()),
            other => Err(Error::Config(format!(
                "Unknown prompt_version '{}' (expected v1 or v2)",
                other
            ))),
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect()
}

/// Locate and parse the TOML config file; absent file yields all-None config
fn load_toml_config() -> Result<TomlConfig> {
    let path = match std::env::var("DOCMILL_CONFIG") {
        Ok(p) => Some(PathBuf::from(p)),
        Err(_) => dirs::config_dir().map(|d| d.join("docmill").join("config.toml")),
    };

    let Some(path) = path else {
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

    info!("Loaded config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        assert!(s.validate().is_ok());
        assert_eq!(s.poll_interval_secs, 4);
        assert_eq!(s.poll_batch_size, 3);
        assert_eq!(s.prompt_version, "v2");
    }

    #[test]
    fn split_list_trims_and_drops_empty() {
        assert_eq!(
            split_list("gpt-4o, gpt-4o-mini,,"),
            vec!["gpt-4o".to_string(), "gpt-4o-mini".to_string()]
        );
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let mut s = Settings::default();
        s.poll_interval_secs = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn unknown_prompt_version_rejected() {
        let mut s = Settings::default();
        s.prompt_version = "v9".to_string();
        assert!(s.validate().is_err());
    }
}
