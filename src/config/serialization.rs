//! Config serialization to TOML
//!
//! Single source of truth for config file format.

use super::Config;

impl Config {
    /// Render the config as a commented TOML file
    ///
    /// Used for the template written on first run and for `config --show`.
    pub fn to_toml(&self) -> String {
        format!(
            r#"# ollama-relay configuration
#
# Environment variables override this file:
#   RELAY_BIND, OLLAMA_HOST, RELAY_STATIC_DIR, RUST_LOG

# Address the gateway listens on
bind_addr = "{bind}"

# Inference server base URL
upstream_url = "{upstream}"

# Static files served at / (skipped if the directory does not exist)
static_dir = "{static_dir}"

# Stream relay settings
[relay]
# Allow cross-origin requests from any origin
cors = {cors}
# Send an empty ":" comment first so clients see headers before the model answers
open_comment = {open_comment}
# End the stream right after the record with "done": true
stop_on_done = {stop_on_done}
# Idle upstream connections kept for reuse
pool_max_idle_per_host = {pool}

# Logging configuration (RUST_LOG env var overrides)
[logging]
level = "{log_level}"
# JSON file logging (in addition to stdout)
file_enabled = {log_file_enabled}
file_dir = "{log_file_dir}"
file_rotation = "{log_file_rotation}"  # hourly, daily, never
file_prefix = "{log_file_prefix}"
"#,
            bind = self.bind_addr,
            upstream = self.upstream_url,
            static_dir = toml_path(&self.static_dir),
            cors = self.relay.cors,
            open_comment = self.relay.open_comment,
            stop_on_done = self.relay.stop_on_done,
            pool = self.relay.pool_max_idle_per_host,
            log_level = self.logging.level,
            log_file_enabled = self.logging.file_enabled,
            log_file_dir = toml_path(&self.logging.file_dir),
            log_file_rotation = self.logging.file_rotation.as_str(),
            log_file_prefix = self.logging.file_prefix,
        )
    }
}

/// Paths go into basic strings, so backslashes (Windows) must be doubled
fn toml_path(path: &std::path::Path) -> String {
    path.display().to_string().replace('\\', "\\\\")
}
