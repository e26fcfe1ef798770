/*!
 * Logging and tracing initialization
 */

use std::fs::File;
use std::path::Path;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{Error, Result};

/// Initialize structured logging based on configuration.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this more than once is harmless; only the first
/// subscriber is installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("cirrus={}", config.level.to_tracing_level())))
        .map_err(|e| Error::InvalidArgument(format!("failed to create log filter: {}", e)))?;

    match &config.file {
        Some(path) => init_file_logging(path, config.format, env_filter),
        None => {
            init_stdout_logging(config.format, env_filter);
            Ok(())
        }
    }
}

fn init_stdout_logging(format: LogFormat, env_filter: EnvFilter) {
    let registry = tracing_subscriber::registry().with(env_filter);

    let layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE);

    let _ = match format {
        LogFormat::Compact => registry.with(layer.compact()).try_init(),
        LogFormat::Json => registry.with(layer.json()).try_init(),
    };
}

fn init_file_logging(log_path: &Path, format: LogFormat, env_filter: EnvFilter) -> Result<()> {
    let file = File::create(log_path)
        .map_err(|e| Error::InvalidArgument(format!("failed to create log file: {}", e)))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    let layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false); // No ANSI colors in file

    let _ = match format {
        LogFormat::Compact => registry.with(layer.compact()).try_init(),
        LogFormat::Json => registry.with(layer.json()).try_init(),
    };

    Ok(())
}

/// Install a test writer subscriber once per process
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cirrus=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok(); // Ignore error if already initialized
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use tempfile::NamedTempFile;

    #[test]
    fn test_init_is_idempotent() {
        init_test_logging();
        init_test_logging();

        // A second subscriber is silently ignored
        init_logging(&LoggingConfig::default()).unwrap();
    }

    #[test]
    fn test_init_file_logging_creates_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();
        std::fs::remove_file(&path).unwrap();

        let config = LoggingConfig {
            level: LogLevel::Debug,
            format: LogFormat::Json,
            file: Some(path.clone()),
        };

        init_logging(&config).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_unwritable_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            file: Some(dir.path().join("missing").join("cirrus.log")),
            ..Default::default()
        };

        assert!(init_logging(&config).is_err());
    }
}
