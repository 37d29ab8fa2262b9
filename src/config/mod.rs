//! Configuration for the relay
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/ollama-relay/config.toml)
//! 3. Built-in defaults (lowest priority)
//!
//! Command-line flags are applied on top by `main` via `apply_overrides`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

// ─────────────────────────────────────────────────────────────────────────────
// Submodules
// ─────────────────────────────────────────────────────────────────────────────

mod observability;
mod relay;
mod serialization;


use observability::FileLogging;
use relay::FileRelay;

pub use observability::{LogRotation, LoggingConfig};
pub use relay::RelayConfig;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_BIND: &str = "127.0.0.1:5080";
const DEFAULT_UPSTREAM: &str = "http://127.0.0.1:11434";
const DEFAULT_STATIC_DIR: &str = "./wwwroot";

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the gateway listens on
    pub bind_addr: SocketAddr,

    /// Base URL of the inference server (no trailing slash)
    pub upstream_url: String,

    /// Directory served as static files (skipped when missing)
    pub static_dir: PathBuf,

    /// Stream relay and HTTP surface settings
    pub relay: RelayConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5080)),
            upstream_url: DEFAULT_UPSTREAM.to_string(),
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
            relay: RelayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub bind_addr: Option<String>,
    pub upstream_url: Option<String>,
    pub static_dir: Option<String>,

    /// Optional [relay] section
    pub relay: Option<FileRelay>,

    /// Optional [logging] section
    pub logging: Option<FileLogging>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Get the config file path: ~/.config/ollama-relay/config.toml
    /// Uses Unix-style ~/.config on all platforms for consistency
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| {
            p.join(".config")
                .join("ollama-relay")
                .join("config.toml")
        })
    }

    /// Create config file with defaults if it doesn't exist
    /// Called during startup to help users discover configuration options
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };

        if path.exists() {
            return;
        }

        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return; // Config is optional
            }
        }

        let _ = std::fs::write(&path, Self::default().to_toml());
    }

    /// Load configuration: env vars > config file > defaults
    ///
    /// A config file that exists but cannot be read or parsed is an error,
    /// not a silent fallback to defaults.
    pub fn load() -> Result<Self> {
        let file = match Self::config_path() {
            Some(path) => load_file_config(&path)?,
            None => FileConfig::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Load with an explicit config file path instead of the default location
    #[cfg(test)]
    pub(crate) fn load_from(path: &Path) -> Result<Self> {
        Self::resolve(load_file_config(path)?, |key| std::env::var(key).ok())
    }

    /// Merge a parsed file with the environment (`env` looks a variable up)
    pub(crate) fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Bind address: env > file > default
        let bind_raw = env("RELAY_BIND")
            .or(file.bind_addr)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr = bind_raw
            .parse()
            .with_context(|| format!("Invalid bind address '{}'", bind_raw))?;

        // Upstream: env > file > default
        let upstream_url = normalize_url(
            &env("OLLAMA_HOST")
                .or(file.upstream_url)
                .unwrap_or_else(|| DEFAULT_UPSTREAM.to_string()),
        );

        // Static directory: env > file > default
        let static_dir = env("RELAY_STATIC_DIR")
            .or(file.static_dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR));

        Ok(Self {
            bind_addr,
            upstream_url,
            static_dir,
            relay: RelayConfig::from_file(file.relay),
            logging: LoggingConfig::from_file(file.logging),
        })
    }

    /// Apply command-line overrides (highest precedence of all)
    pub fn apply_overrides(&mut self, bind: Option<SocketAddr>, upstream: Option<String>) {
        if let Some(bind) = bind {
            self.bind_addr = bind;
        }
        if let Some(upstream) = upstream {
            self.upstream_url = normalize_url(&upstream);
        }
    }
}

/// Read and parse a config file; a missing file yields defaults
fn load_file_config(path: &Path) -> Result<FileConfig> {
    match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents)
            .with_context(|| format!("Failed to parse configuration file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(e) => Err(e)
            .with_context(|| format!("Cannot read configuration file {}", path.display())),
    }
}

/// Accept `host:port` as Ollama itself does, and drop any trailing slash
fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

/// Print a clear, actionable message for a broken config file
pub fn print_load_error(error: &anyhow::Error) {
    eprintln!("\n╔══════════════════════════════════════════════════════════════╗");
    eprintln!("║  CONFIG ERROR - Failed to load configuration                 ║");
    eprintln!("╚══════════════════════════════════════════════════════════════╝\n");
    eprintln!("  Error: {:#}\n", error);
    eprintln!("  Tip: Check for:\n");
    eprintln!("    - Missing quotes around string values");
    eprintln!("    - Invalid boolean values (use true/false)");
    eprintln!("    - Addresses in host:port form (bind_addr, RELAY_BIND)");
    eprintln!("    - Typos in section names\n");
    eprintln!("  To reset, run `ollama-relay config --reset`.\n");
}
