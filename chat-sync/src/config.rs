//! Configuration management for the conversation sync engine.

use crate::constants::{paging, timing};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the JSON config file.
pub const CONFIG_ENV: &str = "CHAT_SYNC_CONFIG";

/// Errors reading or writing the config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Sync engine configuration, stored as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Messages fetched when a conversation opens
    pub initial_page_size: usize,
    /// Target messages per backward page
    pub older_page_size: usize,
    /// Backward query over-fetch factor
    pub older_fetch_multiplier: usize,
    /// Delay before attaching the live listener
    pub listener_attach_delay_ms: u64,
    /// Quiet period before the one-time scroll to bottom
    pub initial_scroll_debounce_ms: u64,
    /// Minimum spacing between load-older requests
    pub load_older_throttle_ms: u64,
    /// Floating date marker visibility
    pub date_marker_hide_ms: u64,
    /// Per-fetch timeout
    pub fetch_timeout_secs: u64,
    /// Re-sort when an update changes a message timestamp
    pub resort_on_update: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_page_size: paging::INITIAL_PAGE_SIZE,
            older_page_size: paging::OLDER_PAGE_SIZE,
            older_fetch_multiplier: paging::OLDER_FETCH_MULTIPLIER,
            listener_attach_delay_ms: timing::LISTENER_ATTACH_DELAY_MS,
            initial_scroll_debounce_ms: timing::INITIAL_SCROLL_DEBOUNCE_MS,
            load_older_throttle_ms: timing::LOAD_OLDER_THROTTLE_MS,
            date_marker_hide_ms: timing::DATE_MARKER_HIDE_MS,
            fetch_timeout_secs: timing::FETCH_TIMEOUT_SECS,
            resort_on_update: true,
        }
    }
}

impl SyncConfig {
    /// Load configuration from the file named by `CHAT_SYNC_CONFIG`,
    /// falling back to defaults if unset or unreadable.
    pub fn load() -> Self {
        let Some(path) = std::env::var_os(CONFIG_ENV).map(PathBuf::from) else {
            tracing::debug!("{} not set, using default config", CONFIG_ENV);
            return Self::default();
        };
        match Self::load_from(&path) {
            Ok(config) => {
                tracing::info!("Loaded config: {:?}", config);
                config
            }
            Err(err) => {
                tracing::error!(%err, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Save configuration to a JSON file.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Size of one backward query.
    pub fn older_fetch_limit(&self) -> usize {
        self.older_page_size.saturating_mul(self.older_fetch_multiplier.max(1))
    }

    pub fn listener_attach_delay(&self) -> Duration {
        Duration::from_millis(self.listener_attach_delay_ms)
    }

    pub fn initial_scroll_debounce(&self) -> Duration {
        Duration::from_millis(self.initial_scroll_debounce_ms)
    }

    pub fn load_older_throttle(&self) -> Duration {
        Duration::from_millis(self.load_older_throttle_ms)
    }

    pub fn date_marker_hide(&self) -> Duration {
        Duration::from_millis(self.date_marker_hide_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.initial_page_size, 10);
        assert_eq!(config.older_fetch_limit(), 30);
        assert_eq!(config.load_older_throttle(), Duration::from_millis(500));
        assert!(config.resort_on_update);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"initial_page_size": 25, "resort_on_update": false}"#)
                .unwrap();
        assert_eq!(config.initial_page_size, 25);
        assert!(!config.resort_on_update);
        assert_eq!(config.older_page_size, 10);
    }

    #[test]
    fn test_save_and_load_file() {
        let path = std::env::temp_dir().join(format!("chat-sync-config-{}.json", std::process::id()));
        let config = SyncConfig {
            older_page_size: 4,
            ..SyncConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(SyncConfig::load_from(&path).unwrap(), config);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = SyncConfig::load_from(Path::new("/nonexistent/chat-sync.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
