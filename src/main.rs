// Ollama Relay - Streaming gateway for a local inference server
//
// Clients post generation/chat requests; the relay forces streaming on,
// forwards them to the inference server, and re-emits its newline-delimited
// JSON as Server-Sent Events. The rest of the upstream API passes through.
//
// Architecture:
// - Proxy server (axum): routes, passthroughs, static files
// - Relay core: normalize → upstream → line splitting → SSE reframing
// - Cancellation: one root token; every request token is its child

mod cli;
mod config;
mod logging;
mod proxy;
mod startup;

use anyhow::{Context, Result};
use clap::Parser;
use config::Config;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // Handle CLI commands first (config --show, --path, --reset)
    if let Some(command) = cli.command {
        return cli::handle_command(command);
    }

    // Ensure config template exists (helps users discover options)
    Config::ensure_config_exists();

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            config::print_load_error(&e);
            std::process::exit(1);
        }
    };
    config.apply_overrides(cli.bind, cli.upstream);

    // The guard must be kept alive for the duration of the program to ensure logs flush
    let _file_guard = logging::init(&config.logging)?;

    startup::print_startup(&config);
    startup::log_startup(&config);

    // Cancelling this ends the listener and every in-flight stream
    let shutdown = CancellationToken::new();

    let mut proxy_handle = tokio::spawn(proxy::start_proxy(config, shutdown.clone()));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            tracing::info!("Shutting down...");
        }
        // Server ended on its own: bind failure or fatal server error
        result = &mut proxy_handle => {
            return result.context("Proxy task panicked")?;
        }
    }

    shutdown.cancel();
    proxy_handle.await.context("Proxy task panicked")??;

    tracing::info!("Shutdown complete");
    Ok(())
}
