//! Configuration for the relay.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::conversations::core::errors::{StoreError, StoreResult};

/// Default retention window: 30 days, in milliseconds.
pub const DEFAULT_RETENTION_MS: u64 = 30 * 86_400_000;

/// Default purge cadence: once per day, in seconds.
pub const DEFAULT_PURGE_INTERVAL_SECONDS: u64 = 86_400;

/// Top-level configuration for the relay.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Storage settings.
    pub storage: StorageConfig,
    /// Retention and purge settings.
    pub retention: RetentionConfig,
    /// Generation backend settings.
    pub generator: GeneratorConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
}

impl RelayConfig {
    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> StoreResult<()> {
        if self.retention.threshold_ms == 0 {
            return Err(StoreError::InvalidConfig(
                "retention.threshold_ms must be > 0".to_string(),
            ));
        }

        if self.retention.purge_interval_seconds == 0 {
            return Err(StoreError::InvalidConfig(
                "retention.purge_interval_seconds must be > 0".to_string(),
            ));
        }

        if self.generator.model.trim().is_empty() {
            return Err(StoreError::InvalidConfig(
                "generator.model must not be empty".to_string(),
            ));
        }

        if !self.generator.temperature.is_finite() || self.generator.temperature < 0.0 {
            return Err(StoreError::InvalidConfig(
                "generator.temperature must be finite and >= 0".to_string(),
            ));
        }

        if let Some(base_url) = &self.generator.base_url {
            Url::parse(base_url)?;
        }

        Ok(())
    }
}

/// Storage layout settings.
///
/// Each account scope lives in its own database file under `data_dir`;
/// the registry file records every account that has ever opened a scope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding per-account scope databases.
    pub data_dir: PathBuf,
    /// File name of the account registry database.
    pub registry_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("relay-data"),
            registry_file: "accounts.sqlite".to_string(),
        }
    }
}

/// Retention window and purge cadence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Conversations whose last access predates this window are purged.
    pub threshold_ms: u64,
    /// Interval between scheduled purge cycles (in seconds).
    pub purge_interval_seconds: u64,
    /// Whether the background scheduler is enabled.
    pub enabled: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            threshold_ms: DEFAULT_RETENTION_MS,
            purge_interval_seconds: DEFAULT_PURGE_INTERVAL_SECONDS,
            enabled: true,
        }
    }
}

/// Generation backend settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Optional custom base URL; defaults to local Ollama.
    pub base_url: Option<String>,
    /// Completion model name.
    pub model: String,
    /// Temperature for generation.
    pub temperature: f64,
    /// Optional max tokens.
    pub max_tokens: Option<u64>,
    /// Keep the model loaded between calls.
    pub keep_alive: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: "ministral-3:8b-instruct-2512-q8_0".to_string(),
            temperature: 0.4,
            max_tokens: None,
            keep_alive: "5m".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}
