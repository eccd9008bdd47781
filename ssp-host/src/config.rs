//! Configuration for the ingest host.

use std::path::Path;

use serde::{Deserialize, Serialize};

use ssp_core::transport::DEFAULT_CONNECTOR_PORT;
use ssp_core::{BackoffPolicy, Encoder, ProcessLauncher, SourceSettings, SyncMode};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Helper process settings.
    pub connector: ConnectorConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
    /// Camera feeds to run.
    pub sources: Vec<SourceConfig>,
}

/// Helper process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Path to the connector executable.
    pub path: String,
    /// Camera port handed to the connector.
    pub port: u16,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before each reconnect attempt, in seconds. The last entry
    /// repeats.
    pub delays_secs: Vec<u64>,
}

/// One camera feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub name: String,
    /// Camera IP address.
    pub address: String,
    pub bitrate_mbps: u64,
    pub sync_mode: SyncMode,
    pub hw_accel: bool,
    pub wait_i_frame: bool,
    /// "H264" or "H265".
    pub encoder: Encoder,
    /// `"<width>*<height>"`.
    pub resolution: String,
    pub framerate: String,
    pub low_noise: bool,
    pub tally: bool,
    /// Stream even when the camera cannot be configured.
    pub no_check: bool,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            path: "ssp-connector".into(),
            port: DEFAULT_CONNECTOR_PORT,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delays_secs: BackoffPolicy::default()
                .delays()
                .iter()
                .map(|d| d.as_secs())
                .collect(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: "camera".into(),
            address: String::new(),
            bitrate_mbps: 20,
            sync_mode: SyncMode::default(),
            hw_accel: false,
            wait_i_frame: true,
            encoder: Encoder::default(),
            resolution: "1920*1080".into(),
            framerate: "30".into(),
            low_noise: false,
            tally: false,
            no_check: true,
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl HostConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Defaults plus one example source, for `--gen-config`.
    pub fn sample() -> Self {
        Self {
            sources: vec![SourceConfig {
                address: "192.168.1.100".into(),
                ..SourceConfig::default()
            }],
            ..Self::default()
        }
    }

    pub fn to_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::from_secs(&self.reconnect.delays_secs)
    }

    pub fn to_launcher(&self) -> ProcessLauncher {
        ProcessLauncher::new(&self.connector.path).with_port(self.connector.port)
    }
}

impl SourceConfig {
    pub fn to_settings(&self) -> SourceSettings {
        SourceSettings {
            address: self.address.trim().to_string(),
            bitrate: self.bitrate_mbps.saturating_mul(1_000_000),
            sync_mode: self.sync_mode,
            hw_accel: self.hw_accel,
            wait_i_frame: self.wait_i_frame,
            encoder: self.encoder,
            resolution: self.resolution.clone(),
            framerate: self.framerate.clone(),
            low_noise: self.low_noise,
            tally: self.tally,
            no_check: self.no_check,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
