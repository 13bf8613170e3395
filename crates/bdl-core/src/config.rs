use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Transfer loop tuning (optional `[transfer]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Read buffer size for streaming a response body to disk.
    pub chunk_bytes: usize,
    /// Checkpoint an item whenever this percentage of its size is unflushed.
    pub checkpoint_percent: u8,
    /// Checkpoint interval in bytes when the item size is unknown.
    pub unknown_size_checkpoint_bytes: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: 1024,
            checkpoint_percent: 1,
            unknown_size_checkpoint_bytes: 1024 * 1024,
        }
    }
}

impl TransferConfig {
    /// Unflushed byte count that triggers a checkpoint for an item of `total_size`.
    pub fn checkpoint_threshold(&self, total_size: Option<u64>) -> u64 {
        match total_size {
            Some(total) if total > 0 => {
                (total * u64::from(self.checkpoint_percent.max(1)) / 100).max(1)
            }
            _ => self.unknown_size_checkpoint_bytes.max(1),
        }
    }
}

/// libcurl transport settings (optional `[transport]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_secs: u64,
    /// Abort when throughput stays below this many bytes/s for `low_speed_time_secs`.
    pub low_speed_limit_bytes: u32,
    pub low_speed_time_secs: u64,
    pub max_redirections: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            low_speed_limit_bytes: 1024,
            low_speed_time_secs: 60,
            max_redirections: 10,
        }
    }
}

/// Global configuration loaded from `~/.config/bdl/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BdlConfig {
    /// Number of bundles downloading at once (worker pool size).
    pub concurrency: usize,
    /// Base directory for new bundles; the CLI falls back to the current directory.
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Default for BdlConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            download_dir: None,
            transfer: TransferConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("bdl")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<BdlConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = BdlConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: BdlConfig = toml::from_str(&data)?;
    Ok(cfg)
}
