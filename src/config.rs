use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::recreate::DestroyWait;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Seconds between update checks in daemon mode.
    pub update_interval_secs: u64,
    pub check_on_startup: bool,
    pub destroy_poll_interval_ms: u64,
    pub destroy_poll_max_interval_ms: u64,
    /// `None` or `0` waits forever for the daemon to confirm removal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destroy_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            update_interval_secs: 6 * 60 * 60,
            check_on_startup: true,
            destroy_poll_interval_ms: 1000,
            destroy_poll_max_interval_ms: 8000,
            destroy_timeout_secs: Some(300),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("redock.toml"))
                .merge(Json::file("redock.json"))
                .merge(Env::prefixed("REDOCK_")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        if config.update_interval_secs == 0 {
            anyhow::bail!("update_interval_secs must be greater than zero");
        }
        if config.destroy_poll_interval_ms == 0 {
            anyhow::bail!("destroy_poll_interval_ms must be greater than zero");
        }

        Ok(config)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn destroy_wait(&self) -> DestroyWait {
        let interval = Duration::from_millis(self.destroy_poll_interval_ms);
        DestroyWait {
            interval,
            max_interval: Duration::from_millis(self.destroy_poll_max_interval_ms).max(interval),
            timeout: self
                .destroy_timeout_secs
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
        }
    }
}
