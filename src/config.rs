use crate::slots::SlotConfig;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub const CONFIG_FILE: &str = "exam_scheduler.toml";
pub const ENV_PREFIX: &str = "EXAM_SCHEDULER_";

#[derive(Debug, Error)]
#[error("config error: {0}")]
pub struct ConfigError(#[from] figment::Error);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: String,
    /// JSON file with `{students, rooms, courses}` loaded at start-up.
    pub catalog_path: Option<PathBuf>,
    pub slots: SlotConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            catalog_path: None,
            slots: SlotConfig::default(),
        }
    }
}

impl Config {
    /// Defaults, then `exam_scheduler.toml`, then `EXAM_SCHEDULER_*` variables
    /// (nested keys separated by `__`, e.g. `EXAM_SCHEDULER_SLOTS__EXCLUDE_WEEKENDS`).
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self::figment().extract()?)
    }
}
