use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Root of the download service, e.g. `http://127.0.0.1:5000`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Timeout for one-shot requests (poll, submit, cancel).  Streams are
    /// not bounded by it.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Timings of the notification lifecycle, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Delay between `completed` and the start of removal.
    #[serde(default = "default_success_decay_ms")]
    pub success_decay_ms: u64,
    /// Delay between `failed` and the start of removal.  Longer than the
    /// success decay so the reason can be read.
    #[serde(default = "default_failure_decay_ms")]
    pub failure_decay_ms: u64,
    /// Upper bound on the exit transition; the entry is dropped when this
    /// fires even if no transition confirmation arrived.
    #[serde(default = "default_removal_fallback_ms")]
    pub removal_fallback_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// How long a finished notification may linger before the sweep
    /// force-removes it.
    #[serde(default = "default_completed_grace_ms")]
    pub completed_grace_ms: u64,
    /// Absolute age ceiling regardless of state (running batches excepted).
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: u64,
    /// Default lifetime of status-only notices.
    #[serde(default = "default_status_notice_ms")]
    pub status_notice_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Fixed delay before the global stream reconnects.
    #[serde(default = "default_global_reconnect_ms")]
    pub global_reconnect_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Consecutive global-stream failures before a "reconnecting" notice is
    /// shown.
    #[serde(default = "default_reconnect_notice_after")]
    pub reconnect_notice_after: u32,
}

impl LifecycleConfig {
    pub fn success_decay(&self) -> Duration {
        Duration::from_millis(self.success_decay_ms)
    }

    pub fn failure_decay(&self) -> Duration {
        Duration::from_millis(self.failure_decay_ms)
    }

    pub fn removal_fallback(&self) -> Duration {
        Duration::from_millis(self.removal_fallback_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn completed_grace(&self) -> Duration {
        Duration::from_millis(self.completed_grace_ms)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }

    pub fn status_notice(&self) -> Duration {
        Duration::from_millis(self.status_notice_ms)
    }
}

impl ChannelsConfig {
    pub fn global_reconnect(&self) -> Duration {
        Duration::from_millis(self.global_reconnect_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            success_decay_ms: default_success_decay_ms(),
            failure_decay_ms: default_failure_decay_ms(),
            removal_fallback_ms: default_removal_fallback_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            completed_grace_ms: default_completed_grace_ms(),
            max_age_ms: default_max_age_ms(),
            status_notice_ms: default_status_notice_ms(),
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            global_reconnect_ms: default_global_reconnect_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            reconnect_notice_after: default_reconnect_notice_after(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_success_decay_ms() -> u64 {
    2_500
}

fn default_failure_decay_ms() -> u64 {
    5_000
}

fn default_removal_fallback_ms() -> u64 {
    500
}

fn default_sweep_interval_ms() -> u64 {
    2_000
}

fn default_completed_grace_ms() -> u64 {
    3_000
}

fn default_max_age_ms() -> u64 {
    30_000
}

fn default_status_notice_ms() -> u64 {
    10_000
}

fn default_global_reconnect_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_reconnect_notice_after() -> u32 {
    1
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`, writing the defaults there first when it does not
    /// exist yet.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
