use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::FetchError;

pub const DEFAULT_CONFIG_FILE: &str = "encode-fetch.json";
pub const DEFAULT_BASE_URL: &str = "https://www.encodeproject.org";
pub const AUTH_TOKEN_ENV: &str = "ENCODE_AUTH_TOKEN";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub outdir: Option<String>,
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub download_threads: Option<usize>,
    #[serde(default)]
    pub max_retries: Option<usize>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub download_timeout_secs: Option<u64>,
    #[serde(default)]
    pub backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub base_url: String,
    pub auth_token: Option<String>,
    pub outdir: String,
    pub threads: usize,
    pub download_threads: usize,
    pub max_retries: usize,
    pub chunk_size: usize,
    pub timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub backoff_ms: u64,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_token: None,
            outdir: "encode_results".to_string(),
            threads: 6,
            download_threads: 6,
            max_retries: 3,
            chunk_size: 1024 * 1024,
            timeout_secs: 120,
            download_timeout_secs: 60,
            backoff_ms: 1000,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `encode-fetch.json` from the working directory when no
    /// path is given. Only an explicitly named file is required to exist.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, FetchError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if !config_path.exists() {
            if path.is_some() {
                return Err(FetchError::MissingConfig(config_path));
            }
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| FetchError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| FetchError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, FetchError> {
        let defaults = ResolvedConfig::default();
        let auth_token = config
            .auth_token
            .or_else(|| std::env::var(AUTH_TOKEN_ENV).ok())
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        let resolved = ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(defaults.schema_version),
            base_url: config
                .base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            auth_token,
            outdir: config.outdir.unwrap_or(defaults.outdir),
            threads: config.threads.unwrap_or(defaults.threads),
            download_threads: config.download_threads.unwrap_or(defaults.download_threads),
            max_retries: config.max_retries.unwrap_or(defaults.max_retries),
            chunk_size: config.chunk_size.unwrap_or(defaults.chunk_size),
            timeout_secs: config.timeout_secs.unwrap_or(defaults.timeout_secs),
            download_timeout_secs: config
                .download_timeout_secs
                .unwrap_or(defaults.download_timeout_secs),
            backoff_ms: config.backoff_ms.unwrap_or(defaults.backoff_ms),
        };

        resolved.validate()?;
        Ok(resolved)
    }
}

impl ResolvedConfig {
    /// Rejects settings that would stall a run. Re-checked after CLI overrides.
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.threads == 0 || self.download_threads == 0 {
            return Err(FetchError::ConfigParse(
                "thread counts must be at least 1".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(FetchError::ConfigParse(
                "chunk_size must be at least 1 byte".to_string(),
            ));
        }
        Ok(())
    }
}
