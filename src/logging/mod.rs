// Logging module - tracing subscriber setup
//
// Logs always go to stdout. When file logging is enabled, a second layer
// writes JSON lines to a rotating file through a non-blocking writer.
//
// Precedence for the filter: RUST_LOG env var > config level > "info".

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogRotation, LoggingConfig};

/// Filter directives used when RUST_LOG is not set
pub fn default_directives(level: &str) -> String {
    format!("ollama_relay={},tower_http=debug", level)
}

fn file_appender(config: &LoggingConfig) -> RollingFileAppender {
    let dir = &config.file_dir;
    let prefix = &config.file_prefix;
    match config.file_rotation {
        LogRotation::Hourly => tracing_appender::rolling::hourly(dir, prefix),
        LogRotation::Daily => tracing_appender::rolling::daily(dir, prefix),
        LogRotation::Never => tracing_appender::rolling::never(dir, prefix),
    }
}

/// Install the global subscriber
///
/// The returned guard must be kept alive for the duration of the program so
/// buffered file output is flushed on exit.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level)));

    let (file_layer, guard) = if config.file_enabled {
        match std::fs::create_dir_all(&config.file_dir) {
            Ok(()) => {
                // Writes happen on a background thread
                let (writer, guard) = tracing_appender::non_blocking(file_appender(config));
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false);
                (Some(layer), Some(guard))
            }
            Err(e) => {
                // Fall back to stdout only
                eprintln!(
                    "Warning: Could not create log directory {:?}: {}",
                    config.file_dir, e
                );
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_parse() {
        let directives = default_directives("debug");
        assert_eq!(directives, "ollama_relay=debug,tower_http=debug");
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_file_appender_writes_into_configured_dir() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            file_enabled: true,
            file_dir: dir.path().to_path_buf(),
            file_rotation: LogRotation::Never,
            ..LoggingConfig::default()
        };

        let mut appender = file_appender(&config);
        appender.write_all(b"{\"msg\":\"hello\"}\n").unwrap();
        appender.flush().unwrap();

        let written = std::fs::read_to_string(dir.path().join("ollama-relay")).unwrap();
        assert!(written.contains("hello"));
    }
}
