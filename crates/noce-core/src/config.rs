use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::remote::RemoteLayout;

/// Fixed delays used by the loops (optional `[timing]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Delay between failed mount attempts, in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Pause after a change notification before re-walking the tree, in milliseconds.
    pub poll_interval_ms: u64,
    /// Pause after a signature mismatch before the next attempt, in milliseconds.
    pub bad_signature_backoff_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 500,
            poll_interval_ms: 1000,
            bad_signature_backoff_ms: 10_000,
        }
    }
}

impl TimingConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn bad_signature_backoff(&self) -> Duration {
        Duration::from_millis(self.bad_signature_backoff_ms)
    }
}

/// Bounded channel capacities. Producers block once a channel is full.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Tree events awaiting the reactor.
    pub events: usize,
    /// Register/commit/delete messages awaiting the cleanup coordinator.
    pub cleanup: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            events: 10,
            cleanup: 10,
        }
    }
}

/// Global configuration loaded from `~/.config/noce/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoceConfig {
    /// Remote endpoint: `host:port` for 9P, or `dir:<path>` to export a local directory.
    pub address: String,
    /// Log verbosity: 0 = info, 1 = crate debug, 2 = debug, 3+ = trace.
    pub debug_level: u8,
    /// X.509 certificate whose RSA key signs the artifact (DER or PEM).
    pub trust_anchor: PathBuf,
    /// Where a verified artifact is renamed to.
    pub destination: PathBuf,
    /// Directory for in-flight temp files. Must be on the same filesystem as `destination`.
    pub temp_dir: PathBuf,
    /// Name prefix for temp files.
    pub temp_prefix: String,
    pub remote: RemoteLayout,
    pub timing: TimingConfig,
    pub channels: ChannelConfig,
}

impl Default for NoceConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:5645".to_string(),
            debug_level: 0,
            trust_anchor: PathBuf::from("/etc/noce/cert.crt"),
            destination: PathBuf::from("software/vimini"),
            temp_dir: PathBuf::from("."),
            temp_prefix: ".download-".to_string(),
            remote: RemoteLayout::default(),
            timing: TimingConfig::default(),
            channels: ChannelConfig::default(),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("noce")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<NoceConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = NoceConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from(&path)
}

/// Load configuration from an explicit path. Missing keys take their defaults.
pub fn load_from(path: &Path) -> Result<NoceConfig> {
    let data =
        fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    let cfg: NoceConfig =
        toml::from_str(&data).with_context(|| format!("parse config {}", path.display()))?;
    Ok(cfg)
}
