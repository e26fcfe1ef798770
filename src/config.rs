/*!
 * Configuration types for cirrus
 */

use crate::error::{Error, Result};
use crate::transfer::{DEFAULT_WORKERS, MIN_PART_SIZE, MPU_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tunables shared by every transfer orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Size in bytes of each multipart part and ranged download window
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Bodies larger than this are uploaded using a multipart upload
    #[serde(default = "default_mpu_threshold")]
    pub mpu_threshold: u64,

    /// Concurrent part uploads per multipart upload
    #[serde(default = "default_workers")]
    pub part_upload_workers: usize,

    /// Concurrent ranged requests per download
    #[serde(default = "default_workers")]
    pub download_workers: usize,

    /// Concurrent object copies in a bulk copy
    #[serde(default = "default_workers")]
    pub copy_workers: usize,

    /// Concurrent files in a sync
    #[serde(default = "default_workers")]
    pub sync_workers: usize,

    /// Bandwidth limit in bytes per second (0 = unlimited)
    #[serde(default)]
    pub bytes_per_second: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            part_size: default_part_size(),
            mpu_threshold: default_mpu_threshold(),
            part_upload_workers: default_workers(),
            download_workers: default_workers(),
            copy_workers: default_workers(),
            sync_workers: default_workers(),
            bytes_per_second: 0,
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    /// Write logs to this file instead of stdout
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Output format of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single line, human readable
    #[default]
    Compact,

    /// One JSON object per line
    Json,
}

// Default value functions for serde
fn default_part_size() -> u64 {
    MIN_PART_SIZE
}

fn default_mpu_threshold() -> u64 {
    MPU_THRESHOLD
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

impl TransferConfig {
    /// Parse a TOML document; missing fields take their defaults
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::InvalidArgument(format!("invalid configuration: {}", e)))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::InvalidArgument(format!("could not serialize configuration: {}", e)))
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransferConfig::default();
        assert_eq!(config.part_size, 5 * 1024 * 1024);
        assert_eq!(config.mpu_threshold, 15 * 1024 * 1024);
        assert_eq!(config.part_upload_workers, 4);
        assert_eq!(config.bytes_per_second, 0);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = TransferConfig::from_toml_str("").unwrap();
        assert_eq!(config, TransferConfig::default());
    }

    #[test]
    fn test_serialization() {
        let config = TransferConfig {
            part_size: 8 * 1024 * 1024,
            bytes_per_second: 1_000_000,
            ..Default::default()
        };

        let toml = config.to_toml_string().unwrap();
        assert_eq!(TransferConfig::from_toml_str(&toml).unwrap(), config);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
part_size = 10485760
copy_workers = 16
bytes_per_second = 500000

[logging]
level = "debug"
format = "json"
file = "/var/log/cirrus.log"
"#;

        let config = TransferConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.part_size, 10 * 1024 * 1024);
        assert_eq!(config.copy_workers, 16);
        assert_eq!(config.download_workers, 4);
        assert_eq!(config.bytes_per_second, 500_000);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.file, Some(PathBuf::from("/var/log/cirrus.log")));
    }

    #[test]
    fn test_invalid_config() {
        let err = TransferConfig::from_toml_str("part_size = \"big\"").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cirrus.toml");

        let config = TransferConfig {
            sync_workers: 2,
            ..Default::default()
        };
        config.to_file(&path).unwrap();

        assert_eq!(TransferConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
