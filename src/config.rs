//! Configuration management for the risk scoring service

use crate::types::score::{RiskTier, TierThresholds};
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an alternate config file
pub const CONFIG_PATH_ENV: &str = "RISK_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub nats: NatsConfig,
    pub models: ModelsConfig,
    pub scoring: ScoringConfig,
    pub ingest: IngestConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// Without NATS the service still ingests events over HTTP
    pub enabled: bool,
    pub url: String,
    /// Subject for incoming risk events
    pub events_subject: String,
    /// Subject for events that failed validation
    pub dead_letter_subject: String,
    /// Subject for alert-worthy score results
    pub alerts_subject: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "nats://localhost:4222".to_string(),
            events_subject: "risk.events".to_string(),
            dead_letter_subject: "risk.events.dead_letter".to_string(),
            alerts_subject: "risk.alerts".to_string(),
        }
    }
}

/// Model descriptor configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Directory containing model descriptor files
    pub dir: String,
    /// Version to activate at startup; the first loaded model otherwise
    pub active_version: Option<String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: "models".to_string(),
            active_version: None,
        }
    }
}

/// Scoring engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Hard deadline for extraction plus inference
    pub budget_ms: u64,
    pub thresholds: TierThresholds,
    /// Results at or above this tier are published as alerts
    pub alert_tier: RiskTier,
    /// Maximum requests accepted by one batch call
    pub batch_limit: usize,
}

impl ScoringConfig {
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            budget_ms: 100,
            thresholds: TierThresholds::default(),
            alert_tier: RiskTier::High,
            batch_limit: 100,
        }
    }
}

/// Event ingestion configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Buffered HTTP events awaiting the ingestor
    pub channel_capacity: usize,
    pub dead_letter_capacity: usize,
    pub alert_capacity: usize,
    /// Recent event ids remembered per entity for duplicate detection
    pub dedupe_window: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            dead_letter_capacity: 256,
            alert_capacity: 256,
            dedupe_window: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Seconds between summary logs; 0 disables the reporter
    pub report_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 60,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `RISK_CONFIG` or `config/config.toml`, with
    /// `RISK__SECTION__KEY` environment overrides
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config = Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix("RISK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to build configuration from {}", path.display()))?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
