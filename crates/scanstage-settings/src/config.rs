//! Configuration and settings management
//!
//! Aggregates the tunables of every layer — serial connection, protocol
//! timeouts, axis limits and feed rates, scan policy — into one
//! validated file. Supports JSON and TOML stored in the platform config
//! directory.
//!
//! The settle timeout and homing idle window were chosen empirically
//! against specific hardware; they live here, not in code, so they can be
//! re-validated per machine.

use crate::error::{SettingsError, SettingsResult};
use scanstage_communication::{ConnectionParams, MotionConfig, ProtocolConfig};
use scanstage_scan::ScanConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Serial connection parameters
    #[serde(default)]
    pub connection: ConnectionParams,
    /// Protocol client tunables
    #[serde(default)]
    pub protocol: ProtocolConfig,
    /// Axis limits and motion tunables
    #[serde(default)]
    pub motion: MotionConfig,
    /// Scan run policy
    #[serde(default)]
    pub scan: ScanConfig,
}

impl Config {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file (JSON or TOML, by extension)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::LoadError(format!("{}: {}", path.display(), e)))?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            other => {
                return Err(SettingsError::UnsupportedFormat(
                    other.unwrap_or("none").to_string(),
                ))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Save config to file (JSON or TOML, by extension)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("toml") => toml::to_string_pretty(self)
                .map_err(|e| SettingsError::SaveError(e.to_string()))?,
            other => {
                return Err(SettingsError::UnsupportedFormat(
                    other.unwrap_or("none").to_string(),
                ))
            }
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from the default location, falling back to defaults when the
    /// file does not exist yet.
    pub fn load_or_default() -> SettingsResult<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Default config file location in the platform config directory
    pub fn default_path() -> SettingsResult<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| SettingsError::ConfigDirectory("no config directory".to_string()))?;
        Ok(base.join("scanstage").join("config.toml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        fn invalid(key: &str, reason: &str) -> SettingsError {
            SettingsError::InvalidSetting {
                key: key.to_string(),
                reason: reason.to_string(),
            }
        }

        if self.connection.port.is_empty() {
            return Err(invalid("connection.port", "must not be empty"));
        }
        if self.connection.baud_rate == 0 {
            return Err(invalid("connection.baud_rate", "must be > 0"));
        }
        if self.protocol.command_timeout_ms == 0 {
            return Err(invalid("protocol.command_timeout_ms", "must be > 0"));
        }
        if self.protocol.poll_interval_ms == 0 {
            return Err(invalid("protocol.poll_interval_ms", "must be > 0"));
        }
        if self.protocol.message_log_capacity == 0 {
            return Err(invalid("protocol.message_log_capacity", "must be > 0"));
        }

        let limits = &self.motion.limits;
        for (key, axis) in [
            ("motion.limits.x", &limits.x),
            ("motion.limits.y", &limits.y),
            ("motion.limits.z", &limits.z),
            ("motion.limits.c", &limits.c),
        ] {
            if axis.min >= axis.max {
                return Err(invalid(key, "min must be below max"));
            }
            if axis.max_feed_rate <= 0.0 {
                return Err(invalid(key, "max feed rate must be > 0"));
            }
        }
        if self.motion.default_feed_rate <= 0.0 {
            return Err(invalid("motion.default_feed_rate", "must be > 0"));
        }
        if self.motion.position_tolerance <= 0.0 {
            return Err(invalid("motion.position_tolerance", "must be > 0"));
        }
        if self.motion.unlock_attempts == 0 {
            return Err(invalid("motion.unlock_attempts", "must be > 0"));
        }
        if self.motion.homing_timeout_ms < self.motion.homing_accept_timeout_ms {
            return Err(invalid(
                "motion.homing_timeout_ms",
                "must cover the acceptance timeout",
            ));
        }

        if !(0.0..=1.0).contains(&self.scan.lighting_level) {
            return Err(invalid("scan.lighting_level", "must be within 0.0..=1.0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanstage_scan::PointFailurePolicy;

    #[test]
    fn test_defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.connection.port = "/dev/ttyACM0".to_string();
        config.motion.limits.z.max = 150.0;
        config.scan.failure_policy = PointFailurePolicy::AbortRun;
        config.save_to_file(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.connection.port, "/dev/ttyACM0");
        assert_eq!(loaded.motion.limits.z.max, 150.0);
        assert_eq!(loaded.scan.failure_policy, PointFailurePolicy::AbortRun);
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.protocol.poll_interval_ms = 100;
        config.save_to_file(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.protocol.poll_interval_ms, 100);
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let err = Config::default().save_to_file(&path).unwrap_err();
        assert!(matches!(err, SettingsError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_inverted_limits_are_rejected() {
        let mut config = Config::default();
        config.motion.limits.y.min = 300.0;
        let err = config.validate().unwrap_err();
        match err {
            SettingsError::InvalidSetting { key, .. } => assert_eq!(key, "motion.limits.y"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_lighting_level_bounds() {
        let mut config = Config::default();
        config.scan.lighting_level = 1.5;
        assert!(config.validate().is_err());
    }
}
