use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetch::FetchOptions;
use crate::request::DEFAULT_SCHEME;
use crate::retry::RetryPolicy;

/// Directory (under XDG data home) that holds the game's mods folder.
const GAME_DATA_DIR: &str = "com.shipofharkinian.soh";

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of fetch attempts (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.5 = 500ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 0.5,
            max_delay_secs: 30,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_secs_f64(self.base_delay_secs.max(0.0)),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

/// What to do when a request arrives for a mod name that already has an active run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Run after the active one finishes (FIFO).
    #[default]
    Queue,
    /// Refuse the new request with `ConflictError::AlreadyInstalling`.
    Reject,
}

/// Global configuration loaded from `~/.config/sohmod/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SohModConfig {
    /// Mods root; when unset, `~/.local/share/com.shipofharkinian.soh/mods`.
    pub mods_root: Option<PathBuf>,
    /// Registered custom URL scheme (without the trailing colon).
    pub scheme: String,
    /// Behavior for same-name requests while one is active.
    pub conflict_policy: ConflictPolicy,
    /// Largest archive the fetcher will accept, in bytes.
    pub max_archive_bytes: u64,
    /// Largest total uncompressed size an archive may declare, in bytes.
    pub max_unpacked_bytes: u64,
    /// TCP/TLS connect timeout per attempt.
    pub connect_timeout_secs: u64,
    /// Wall-clock bound for one fetch attempt.
    pub attempt_timeout_secs: u64,
    /// Abort an attempt if throughput stays below this many bytes/s ...
    pub low_speed_limit_bytes: u32,
    /// ... for this many seconds.
    pub low_speed_time_secs: u64,
    /// Optional retry policy; if missing, built-in defaults are used.
    pub retry: Option<RetryConfig>,
}

impl Default for SohModConfig {
    fn default() -> Self {
        Self {
            mods_root: None,
            scheme: DEFAULT_SCHEME.to_string(),
            conflict_policy: ConflictPolicy::Queue,
            max_archive_bytes: 2 * 1024 * 1024 * 1024,
            max_unpacked_bytes: 8 * 1024 * 1024 * 1024,
            connect_timeout_secs: 30,
            attempt_timeout_secs: 600,
            low_speed_limit_bytes: 1024,
            low_speed_time_secs: 60,
            retry: None,
        }
    }
}

impl SohModConfig {
    /// Effective retry policy (configured section or defaults).
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone().unwrap_or_default().to_policy()
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            max_bytes: self.max_archive_bytes,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs.max(1)),
            low_speed_limit: self.low_speed_limit_bytes,
            low_speed_time: Duration::from_secs(self.low_speed_time_secs.max(1)),
        }
    }

    /// Configured mods root, or the XDG default.
    pub fn resolve_mods_root(&self) -> Result<PathBuf> {
        match &self.mods_root {
            Some(p) => Ok(p.clone()),
            None => default_mods_root(),
        }
    }

    /// Freeze this config into the immutable form the orchestrator is built from.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        Ok(PipelineConfig {
            mods_root: self.resolve_mods_root()?,
            scheme: self.scheme.clone(),
            conflict_policy: self.conflict_policy,
            fetch: self.fetch_options(),
            retry: self.retry_policy(),
            max_unpacked_bytes: self.max_unpacked_bytes,
        })
    }
}

/// Process-lifetime settings handed to `Orchestrator::new`. Never reloaded.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub mods_root: PathBuf,
    pub scheme: String,
    pub conflict_policy: ConflictPolicy,
    pub fetch: FetchOptions,
    pub retry: RetryPolicy,
    pub max_unpacked_bytes: u64,
}

impl PipelineConfig {
    /// Defaults rooted at `mods_root`; handy for tests and embedding.
    pub fn with_mods_root(mods_root: impl Into<PathBuf>) -> Self {
        let cfg = SohModConfig::default();
        Self {
            mods_root: mods_root.into(),
            scheme: cfg.scheme.clone(),
            conflict_policy: cfg.conflict_policy,
            fetch: cfg.fetch_options(),
            retry: cfg.retry_policy(),
            max_unpacked_bytes: cfg.max_unpacked_bytes,
        }
    }
}

pub fn default_mods_root() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::new()?;
    Ok(xdg_dirs.get_data_home().join(GAME_DATA_DIR).join("mods"))
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("sohmod")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Socket a running `sohmod serve` listens on for relayed invocations.
pub fn control_socket_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("sohmod")?;
    Ok(xdg_dirs.get_state_home().join("control.sock"))
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<SohModConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = SohModConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from_path(&path)
}

/// Load configuration from an explicit file (no default is written).
pub fn load_from_path(path: &Path) -> Result<SohModConfig> {
    let data =
        fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    let cfg: SohModConfig =
        toml::from_str(&data).with_context(|| format!("parse config {}", path.display()))?;
    Ok(cfg)
}
