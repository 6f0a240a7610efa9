//! titand configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mediastore::SweepPolicy;

/// The default worker fleet, each name a durable worker identity
pub const TITAN_FLEET: [&str; 10] = [
    "Helios", "Eos", "Aethon", "Crius", "Iapetus", "Perses", "Phlegon", "Phoebe", "Theia",
    "Cronus",
];

/// Main titand configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker fleet configuration
    pub fleet: FleetConfig,

    /// Pipeline and reaper timing
    pub timing: TimingConfig,

    /// Store and remote storage configuration
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .titand.yml
        let local_config = PathBuf::from(".titand.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/titand/titand.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("titand").join("titand.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!(
                            "Failed to load config from {}: {}",
                            user_config.display(),
                            e
                        );
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Worker fleet configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Worker names; each name is a durable identity in the store
    pub names: Vec<String>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            names: TITAN_FLEET.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Pipeline and reaper timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Worker sleep between claim attempts when the queue is empty
    #[serde(rename = "idle-sleep-secs")]
    pub idle_sleep_secs: u64,

    /// Worker sleep between gate checks while rate limited
    #[serde(rename = "cooldown-check-secs")]
    pub cooldown_check_secs: u64,

    /// Pacing delay for the extraction stage
    #[serde(rename = "extraction-delay-secs")]
    pub extraction_delay_secs: u64,

    /// Pacing delay for the detection stage
    #[serde(rename = "processing-delay-secs")]
    pub processing_delay_secs: u64,

    /// Backoff after an unexpected worker error
    #[serde(rename = "error-backoff-secs")]
    pub error_backoff_secs: u64,

    /// Interval between reaper sweeps
    #[serde(rename = "reaper-interval-secs")]
    pub reaper_interval_secs: u64,

    /// Shortened sweep interval while the rate-limit gate is armed
    #[serde(rename = "reaper-recheck-secs")]
    pub reaper_recheck_secs: u64,

    /// Idle time after which a claim or worker ping counts as stale
    #[serde(rename = "stale-after-secs")]
    pub stale_after_secs: u64,

    /// Idle time after which a never-uploaded Pending task is failed
    #[serde(rename = "pending-timeout-secs")]
    pub pending_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            idle_sleep_secs: 10,
            cooldown_check_secs: 120,
            extraction_delay_secs: 5,
            processing_delay_secs: 20,
            error_backoff_secs: 10,
            reaper_interval_secs: 600,
            reaper_recheck_secs: 300,
            stale_after_secs: 600,
            pending_timeout_secs: 900,
        }
    }
}

impl TimingConfig {
    /// Per-worker loop timings
    pub fn pipeline(&self) -> PipelineTimings {
        PipelineTimings {
            idle_sleep: Duration::from_secs(self.idle_sleep_secs),
            cooldown_check: Duration::from_secs(self.cooldown_check_secs),
            extraction_delay: Duration::from_secs(self.extraction_delay_secs),
            processing_delay: Duration::from_secs(self.processing_delay_secs),
            error_backoff: Duration::from_secs(self.error_backoff_secs),
        }
    }

    /// Reaper loop settings
    pub fn reaper(&self) -> ReaperSettings {
        ReaperSettings {
            interval: Duration::from_secs(self.reaper_interval_secs),
            recheck: Duration::from_secs(self.reaper_recheck_secs),
            policy: SweepPolicy {
                stale_after: chrono::Duration::seconds(self.stale_after_secs as i64),
                pending_timeout: chrono::Duration::seconds(self.pending_timeout_secs as i64),
            },
        }
    }
}

/// Resolved worker-loop timings
#[derive(Debug, Clone, Copy)]
pub struct PipelineTimings {
    pub idle_sleep: Duration,
    pub cooldown_check: Duration,
    pub extraction_delay: Duration,
    pub processing_delay: Duration,
    pub error_backoff: Duration,
}

/// Resolved reaper settings
#[derive(Debug, Clone, Copy)]
pub struct ReaperSettings {
    pub interval: Duration,
    pub recheck: Duration,
    pub policy: SweepPolicy,
}

/// Store and remote storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the task database; defaults to the local data dir
    #[serde(rename = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Base URL of the remote object storage service
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Environment variable containing the storage access token
    #[serde(rename = "token-env")]
    pub token_env: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            base_url: "https://storage.example.com".to_string(),
            token_env: "TITAN_STORAGE_TOKEN".to_string(),
        }
    }
}

impl StorageConfig {
    /// Resolve the store directory
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("titand")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fleet_is_the_ten_titans() {
        let config = Config::default();
        assert_eq!(config.fleet.names.len(), 10);
        assert_eq!(config.fleet.names[0], "Helios");
        assert_eq!(config.fleet.names[9], "Cronus");
    }

    #[test]
    fn test_default_timing() {
        let timing = TimingConfig::default();
        assert_eq!(timing.pipeline().idle_sleep, Duration::from_secs(10));
        assert_eq!(timing.pipeline().cooldown_check, Duration::from_secs(120));
        assert_eq!(timing.pipeline().extraction_delay, Duration::from_secs(5));
        assert_eq!(timing.pipeline().processing_delay, Duration::from_secs(20));
        let reaper = timing.reaper();
        assert_eq!(reaper.interval, Duration::from_secs(600));
        assert_eq!(reaper.recheck, Duration::from_secs(300));
        assert_eq!(reaper.policy.stale_after, chrono::Duration::minutes(10));
        assert_eq!(reaper.policy.pending_timeout, chrono::Duration::minutes(15));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: Config = serde_yaml::from_str(
            "timing:\n  idle-sleep-secs: 2\nfleet:\n  names: [\"Helios\", \"Eos\"]\n",
        )
        .unwrap();
        assert_eq!(config.timing.idle_sleep_secs, 2);
        assert_eq!(config.timing.processing_delay_secs, 20);
        assert_eq!(config.fleet.names, vec!["Helios", "Eos"]);
        assert_eq!(config.storage.token_env, "TITAN_STORAGE_TOKEN");
    }
}
