use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use saveguard_storage::StoreConfig;
use serde::Deserialize;

/// Raw config-file shape. Every field is optional; [`Settings::resolve`]
/// layers environment overrides on top and fills in defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub save_dir: Option<String>,
    pub backup_dir: Option<String>,
    pub compress: Option<bool>,
    pub max_backups_per_file: Option<u32>,
    pub cooldown_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_seconds: Option<u64>,
    pub size_threshold_bytes: Option<u64>,
    pub debounce_seconds: Option<u64>,
    pub periodic_interval_seconds: Option<u64>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {path:?}"))?;
    toml::from_str(&contents).with_context(|| format!("parsing config file {path:?}"))
}

/// Supported window for the per-file retention cap.
pub const MAX_BACKUPS_RANGE: (u32, u32) = (1, 100);
/// Supported window for the automatic-backup cooldown, in seconds.
pub const COOLDOWN_RANGE_SECONDS: (u64, u64) = (10, 300);

/// Fully resolved runtime settings: config-file values overridden by
/// `SAVEGUARD_*` environment variables, out-of-range knobs clamped to
/// their supported windows.
#[derive(Debug, Clone)]
pub struct Settings {
    pub save_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub compress: bool,
    pub max_backups_per_file: usize,
    pub cooldown: Duration,
    pub poll_interval: Duration,
    pub size_threshold_bytes: u64,
    pub debounce: Duration,
    /// `None` disables the periodic pass.
    pub periodic_interval: Option<Duration>,
}

impl Settings {
    pub fn resolve(cfg: &Config) -> Settings {
        let save_dir = PathBuf::from(
            env::var("SAVEGUARD_SAVE_DIR")
                .ok()
                .or_else(|| cfg.storage.save_dir.clone())
                .unwrap_or_else(|| "./saves".to_owned()),
        );

        let backup_dir = env::var("SAVEGUARD_BACKUP_DIR")
            .ok()
            .or_else(|| cfg.storage.backup_dir.clone())
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| save_dir.join("Backups"));

        let compress = env::var("SAVEGUARD_COMPRESS")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(cfg.storage.compress)
            .unwrap_or(true);

        let max_backups_per_file = env::var("SAVEGUARD_MAX_BACKUPS")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(cfg.storage.max_backups_per_file)
            .unwrap_or(20)
            .clamp(MAX_BACKUPS_RANGE.0, MAX_BACKUPS_RANGE.1);

        let cooldown_seconds = env::var("SAVEGUARD_COOLDOWN_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(cfg.storage.cooldown_seconds)
            .unwrap_or(60)
            .clamp(COOLDOWN_RANGE_SECONDS.0, COOLDOWN_RANGE_SECONDS.1);

        let periodic_interval = cfg
            .monitor
            .periodic_interval_seconds
            .unwrap_or(900);

        Settings {
            save_dir,
            backup_dir,
            compress,
            max_backups_per_file: max_backups_per_file as usize,
            cooldown: Duration::from_secs(cooldown_seconds),
            poll_interval: Duration::from_secs(
                cfg.monitor.poll_interval_seconds.unwrap_or(2).max(1),
            ),
            size_threshold_bytes: cfg.monitor.size_threshold_bytes.unwrap_or(6000),
            debounce: Duration::from_secs(cfg.monitor.debounce_seconds.unwrap_or(10)),
            periodic_interval: (periodic_interval > 0)
                .then(|| Duration::from_secs(periodic_interval)),
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            backup_dir: self.backup_dir.clone(),
            compress: self.compress,
            max_backups_per_file: self.max_backups_per_file,
            cooldown: self.cooldown,
        }
    }
}
