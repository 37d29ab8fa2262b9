// Startup module - displays banner and module status
//
// Shows version info, where the configuration came from, which optional
// parts of the gateway are active, and where it listens.

use crate::config::{Config, VERSION};

/// ANSI color codes for terminal output
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GREEN: &str = "\x1b[32m";
    pub const MAGENTA: &str = "\x1b[35m";
}

/// Module status for display
pub struct ModuleStatus {
    pub name: &'static str,
    pub enabled: bool,
    pub description: &'static str,
}

/// Print the startup banner and module status
pub fn print_startup(config: &Config) {
    use colors::*;

    println!();
    println!("  {BOLD}{CYAN}Ollama Relay{RESET} {DIM}v{VERSION}{RESET}");
    println!("  {DIM}Streaming SSE gateway for a local inference server{RESET}");
    println!();

    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("  {DIM}Config:{RESET} {GREEN}✓{RESET} {}", path.display());
        } else {
            println!("  {DIM}Config:{RESET} {DIM}(using defaults){RESET}");
        }
    }
    println!();

    println!("  {DIM}Modules{RESET}");
    for module in &module_status(config) {
        print_module_status(module);
    }
    println!();

    println!(
        "  {MAGENTA}▸{RESET} Upstream {BOLD}{}{RESET}",
        config.upstream_url
    );
    println!(
        "  {MAGENTA}▸{RESET} Relay listening on {BOLD}{}{RESET}",
        config.bind_addr
    );
    println!();
}

/// Status of all modules based on config
fn module_status(config: &Config) -> Vec<ModuleStatus> {
    vec![
        ModuleStatus {
            name: "relay",
            enabled: true, // Core, always on
            description: "NDJSON → SSE streaming",
        },
        ModuleStatus {
            name: "passthrough",
            enabled: true, // Core, always on
            description: "Upstream API forwarding",
        },
        ModuleStatus {
            name: "cors",
            enabled: config.relay.cors,
            description: "Cross-origin requests",
        },
        ModuleStatus {
            name: "static",
            enabled: config.static_dir.is_dir(),
            description: "Static files",
        },
        ModuleStatus {
            name: "file-log",
            enabled: config.logging.file_enabled,
            description: "JSON log files",
        },
    ]
}

/// Print a single module's status
fn print_module_status(module: &ModuleStatus) {
    use colors::*;

    let (icon, style) = if module.enabled {
        (format!("{GREEN}✓{RESET}"), "")
    } else {
        (format!("{DIM}○{RESET}"), DIM)
    };

    println!(
        "    {icon} {style}{:<12}{RESET} {DIM}{}{RESET}",
        module.name, module.description
    );
}

/// Log the same information through tracing (ends up in log files too)
pub fn log_startup(config: &Config) {
    tracing::info!("ollama-relay v{}", VERSION);

    for module in &module_status(config) {
        let icon = if module.enabled { "✓" } else { "○" };
        tracing::info!("  {} {} - {}", icon, module.name, module.description);
    }

    tracing::info!("▸ Upstream {}", config.upstream_url);
    tracing::info!("▸ Listening on {}", config.bind_addr);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_status_follows_config() {
        let mut config = Config::default();
        config.relay.cors = false;
        config.static_dir = std::path::PathBuf::from("/definitely/not/here");

        let modules = module_status(&config);
        let enabled = |name: &str| modules.iter().find(|m| m.name == name).unwrap().enabled;
        assert!(enabled("relay"));
        assert!(!enabled("cors"));
        assert!(!enabled("static"));
        assert!(!enabled("file-log"));
    }
}
