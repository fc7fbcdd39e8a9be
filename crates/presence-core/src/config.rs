use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "PRESENCE_DATA_DIR";

/// Get the local data directory for presence.
///
/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn get_data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let mut path =
        dirs::data_local_dir().ok_or_else(|| anyhow::anyhow!("Failed to get local data dir"))?;
    path.push("presence");
    Ok(path)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0} must be greater than zero")]
    NotPositive(&'static str),
    #[error("invalid config: {0} must be a finite number")]
    NotFinite(&'static str),
    #[error("invalid config: sleep_detection_threshold_secs ({sleep}) must exceed poll_interval_secs ({poll})")]
    SleepThresholdBelowPoll { sleep: f64, poll: f64 },
}

/// What the daemon assumes when the platform cannot report idle time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownIdlePolicy {
    /// Treat the user as present (idle = 0). Sessions then only end on lock, sleep or shutdown.
    #[default]
    AssumeActive,
    /// Treat the user as away (idle = infinity).
    AssumeIdle,
}

/// Daemon behaviour, validated once when the daemon is built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub idle_threshold_secs: u64,
    pub sleep_detection_threshold_secs: f64,
    pub boot_detection_limit_secs: f64,
    pub poll_interval_secs: f64,
    pub end_session_on_restart: bool,
    pub monitor_lock_and_sleep: bool,
    pub unknown_idle_policy: UnknownIdlePolicy,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            idle_threshold_secs: 600,
            sleep_detection_threshold_secs: 30.0,
            boot_detection_limit_secs: 120.0,
            poll_interval_secs: 5.0,
            end_session_on_restart: false,
            monitor_lock_and_sleep: true,
            unknown_idle_policy: UnknownIdlePolicy::AssumeActive,
        }
    }
}

impl DaemonConfig {
    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_threshold_secs == 0 {
            return Err(ConfigError::NotPositive("idle_threshold_secs"));
        }
        for (name, value) in [
            ("poll_interval_secs", self.poll_interval_secs),
            ("boot_detection_limit_secs", self.boot_detection_limit_secs),
            ("sleep_detection_threshold_secs", self.sleep_detection_threshold_secs),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NotFinite(name));
            }
        }
        if self.poll_interval_secs <= 0.0 {
            return Err(ConfigError::NotPositive("poll_interval_secs"));
        }
        if self.boot_detection_limit_secs <= 0.0 {
            return Err(ConfigError::NotPositive("boot_detection_limit_secs"));
        }
        if self.sleep_detection_threshold_secs <= self.poll_interval_secs {
            return Err(ConfigError::SleepThresholdBelowPoll {
                sleep: self.sleep_detection_threshold_secs,
                poll: self.poll_interval_secs,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file; defaults to `presence.db` in the data dir
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    /// Minimum seconds between non-forced state writes
    pub persist_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            persist_interval_secs: 30,
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs)
    }

    #[must_use]
    pub fn resolve_db_path(&self, data_dir: &Path) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| data_dir.join("presence.db"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Path of the config file inside `data_dir`
    #[must_use]
    pub fn path_in(data_dir: &Path) -> PathBuf {
        data_dir.join("config.toml")
    }

    /// Load and validate `config.toml`; a missing file yields the defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or validated
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.daemon.validate()?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
