//! # Sync Configuration
//!
//! Configuration for the sync engine: cycle pacing, retry backoff,
//! and storage budget thresholds.
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [sync]
//! pull_interval_secs = 30
//! initial_backoff_ms = 500
//! max_backoff_secs = 60
//!
//! [storage]
//! check_interval_secs = 60
//! warn_threshold_pct = 80.0
//! critical_threshold_pct = 95.0
//! alert_rearm_secs = 300       # suppress duplicate warnings for 5 min
//! order_retention_secs = 3600  # emergency eviction cutoff for cached orders
//! oplog_max_entries = 100      # emergency trim bound for the operation log
//! ```
//!
//! Missing fields fall back to defaults; a missing file yields the
//! default configuration (`load_or_default`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Sync Settings
// =============================================================================

/// Pacing and retry settings for pull/push cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Interval between periodic sync cycles (seconds).
    #[serde(default = "default_pull_interval")]
    pub pull_interval_secs: u64,

    /// Initial backoff for a retried operation (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_pull_interval() -> u64 {
    30
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    60
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            pull_interval_secs: default_pull_interval(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Storage budget monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Interval between usage checks (seconds).
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Warning threshold as a percentage of quota.
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold_pct: f64,

    /// Critical threshold as a percentage of quota. Crossing it
    /// triggers emergency cleanup.
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold_pct: f64,

    /// Re-arm window: a warning fired within this many seconds
    /// suppresses the next one (seconds).
    #[serde(default = "default_alert_rearm")]
    pub alert_rearm_secs: u64,

    /// Cached orders older than this are evicted during emergency
    /// cleanup (seconds). Orders older than an hour have almost
    /// certainly already synced.
    #[serde(default = "default_order_retention")]
    pub order_retention_secs: u64,

    /// Emergency trim bound for the operation log.
    #[serde(default = "default_oplog_max")]
    pub oplog_max_entries: usize,
}

fn default_check_interval() -> u64 {
    60
}

fn default_warn_threshold() -> f64 {
    meridian_core::NEAR_LIMIT_THRESHOLD
}

fn default_critical_threshold() -> f64 {
    meridian_core::CRITICAL_THRESHOLD
}

fn default_alert_rearm() -> u64 {
    300
}

fn default_order_retention() -> u64 {
    3600
}

fn default_oplog_max() -> usize {
    100
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            check_interval_secs: default_check_interval(),
            warn_threshold_pct: default_warn_threshold(),
            critical_threshold_pct: default_critical_threshold(),
            alert_rearm_secs: default_alert_rearm(),
            order_retention_secs: default_order_retention(),
            oplog_max_entries: default_oplog_max(),
        }
    }
}

// =============================================================================
// Sync Config
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Cycle pacing and retry settings.
    #[serde(default)]
    pub sync: SyncSettings,

    /// Storage budget settings.
    #[serde(default)]
    pub storage: StorageSettings,
}

impl SyncConfig {
    /// Returns the default config file path for this platform.
    ///
    /// - Linux: `~/.config/meridian-pos/sync.toml`
    /// - macOS: `~/Library/Application Support/com.meridian.pos/sync.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "meridian", "pos")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    /// Loads the config from `path` (or the platform default). A
    /// missing file yields defaults; a malformed file is an error.
    pub fn load_or_default(path: Option<PathBuf>) -> SyncResult<Self> {
        let path = match path.or_else(Self::default_path) {
            Some(p) => p,
            None => {
                warn!("No config directory available, using defaults");
                return Ok(SyncConfig::default());
            }
        };

        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(SyncConfig::default());
        }

        let raw = std::fs::read_to_string(&path)?;
        let config: SyncConfig = toml::from_str(&raw)?;
        config.validate()?;

        info!(path = %path.display(), "Loaded sync config");
        Ok(config)
    }

    /// Saves the config to `path`, creating parent directories.
    pub fn save(&self, path: &PathBuf) -> SyncResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        debug!(path = %path.display(), "Saved sync config");
        Ok(())
    }

    /// Validates threshold ordering and non-zero pacing.
    pub fn validate(&self) -> SyncResult<()> {
        if self.storage.warn_threshold_pct >= self.storage.critical_threshold_pct {
            return Err(SyncError::InvalidConfig(format!(
                "warn threshold ({}) must be below critical threshold ({})",
                self.storage.warn_threshold_pct, self.storage.critical_threshold_pct
            )));
        }

        if self.storage.critical_threshold_pct > 100.0 {
            return Err(SyncError::InvalidConfig(
                "critical threshold cannot exceed 100%".into(),
            ));
        }

        if self.sync.pull_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "pull interval must be non-zero".into(),
            ));
        }

        if self.storage.oplog_max_entries == 0 {
            return Err(SyncError::InvalidConfig(
                "operation log trim bound must be non-zero".into(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.warn_threshold_pct, 80.0);
        assert_eq!(config.storage.critical_threshold_pct, 95.0);
        assert_eq!(config.storage.alert_rearm_secs, 300);
        assert_eq!(config.storage.order_retention_secs, 3600);
        assert_eq!(config.storage.oplog_max_entries, 100);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut config = SyncConfig::default();
        config.storage.warn_threshold_pct = 96.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            [sync]
            pull_interval_secs = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.sync.pull_interval_secs, 10);
        assert_eq!(config.sync.initial_backoff_ms, 500);
        assert_eq!(config.storage.oplog_max_entries, 100);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = SyncConfig::default();
        let raw = toml::to_string_pretty(&config).unwrap();
        let back: SyncConfig = toml::from_str(&raw).unwrap();
        assert_eq!(back.sync.pull_interval_secs, config.sync.pull_interval_secs);
        assert_eq!(back.storage.oplog_max_entries, config.storage.oplog_max_entries);
    }
}
