use crate::error::{IndexError, Result};
use crate::remote::TimestampField;
use crate::sync::{
    SyncSettings, CONSTRAINED_PAGE_DELAY, CONSTRAINED_PAGE_SIZE, DEFAULT_CYCLE_DELAY,
    DESKTOP_PAGE_DELAY, DESKTOP_PAGE_SIZE,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Host runtime class, selects page size and pacing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeProfile {
    #[default]
    Desktop,
    /// Mobile or battery-powered hosts
    Constrained,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IndexerConfig {
    #[serde(default)]
    pub ordering: TimestampField,
    /// Overrides the ordering's default continuation mode
    #[serde(default)]
    pub cursor_continuation: Option<bool>,
    #[serde(default)]
    pub runtime: RuntimeProfile,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub page_delay_ms: Option<u64>,
    #[serde(default)]
    pub cycle_delay_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProgressConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// One index directory per user is created below this path
    #[serde(default = "default_index_root")]
    pub index_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            index_root: default_index_root(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_index_root() -> PathBuf {
    PathBuf::from("./mail-index-data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| IndexError::Config(e.to_string()))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| IndexError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.indexer.page_size == Some(0) {
            return Err(IndexError::Config("indexer.page_size must be > 0".to_string()));
        }
        if self.progress.poll_interval_ms == 0 {
            return Err(IndexError::Config(
                "progress.poll_interval_ms must be > 0".to_string(),
            ));
        }
        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(IndexError::Config(format!(
                "Unknown logging.format {:?} (expected \"pretty\" or \"json\")",
                other
            ))),
        }
    }

    /// Resolve the engine settings for one indexing session
    pub fn sync_settings(&self) -> SyncSettings {
        let indexer = &self.indexer;
        let (page_size, page_delay) = match indexer.runtime {
            RuntimeProfile::Desktop => (DESKTOP_PAGE_SIZE, DESKTOP_PAGE_DELAY),
            RuntimeProfile::Constrained => (CONSTRAINED_PAGE_SIZE, CONSTRAINED_PAGE_DELAY),
        };
        let defaults = SyncSettings::for_ordering(indexer.ordering);

        SyncSettings {
            ordering: indexer.ordering,
            cursor_continuation: indexer
                .cursor_continuation
                .unwrap_or(defaults.cursor_continuation),
            page_size: indexer.page_size.unwrap_or(page_size),
            page_delay: indexer
                .page_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(page_delay),
            cycle_delay: indexer
                .cycle_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CYCLE_DELAY),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.progress.poll_interval_ms)
    }
}
