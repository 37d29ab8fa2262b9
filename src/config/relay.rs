//! Relay and HTTP surface configuration

use serde::Deserialize;

/// Relay settings
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Allow any origin, method and header (browser clients)
    pub cors: bool,
    /// Send a `:` comment frame first so headers are committed immediately
    pub open_comment: bool,
    /// End the event stream right after a `"done": true` record
    pub stop_on_done: bool,
    /// Idle upstream connections kept in the pool
    pub pool_max_idle_per_host: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            cors: true,
            open_comment: false,
            stop_on_done: true,
            pool_max_idle_per_host: 10,
        }
    }
}

/// Relay settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
pub struct FileRelay {
    pub cors: Option<bool>,
    pub open_comment: Option<bool>,
    pub stop_on_done: Option<bool>,
    pub pool_max_idle_per_host: Option<usize>,
}

impl RelayConfig {
    /// Create from file config with defaults
    pub fn from_file(file: Option<FileRelay>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            cors: file.cors.unwrap_or(defaults.cors),
            open_comment: file.open_comment.unwrap_or(defaults.open_comment),
            stop_on_done: file.stop_on_done.unwrap_or(defaults.stop_on_done),
            pool_max_idle_per_host: file
                .pool_max_idle_per_host
                .unwrap_or(defaults.pool_max_idle_per_host),
        }
    }
}
