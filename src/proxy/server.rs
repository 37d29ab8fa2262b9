//! Proxy server setup and initialization

use std::path::Path;

use anyhow::{Context, Result};
use axum::{handler::Handler, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::config::Config;

use super::handlers::{self, Verb, API_PREFIX, PASSTHROUGH};
use super::state::ProxyState;

/// Mounted routes plus their `METHOD /path` listing, filled in together
struct RouteTable {
    router: Router<ProxyState>,
    listing: Vec<String>,
}

impl RouteTable {
    fn new() -> Self {
        Self {
            router: Router::new(),
            listing: Vec::new(),
        }
    }

    fn add<H, T>(mut self, verb: Verb, path: &str, handler: H) -> Self
    where
        H: Handler<T, ProxyState>,
        T: 'static,
    {
        self.listing.push(format!("{} {}", verb.as_str(), path));
        self.router = self.router.route(path, verb.route(handler));
        self
    }
}

/// Every gateway endpoint; `/_routes` serves the listing built here
fn route_table() -> RouteTable {
    let mut table = RouteTable::new()
        // Streaming relay
        .add(
            Verb::Post,
            &format!("{}/generate/stream", API_PREFIX),
            handlers::generate_stream,
        )
        .add(
            Verb::Post,
            &format!("{}/chat/stream", API_PREFIX),
            handlers::chat_stream,
        );

    // One-shot passthroughs
    for (verb, name) in PASSTHROUGH {
        table = table.add(
            *verb,
            &format!("{}/{}", API_PREFIX, name),
            handlers::passthrough,
        );
    }

    // Meta
    table
        .add(Verb::Get, "/ping", handlers::ping)
        .add(Verb::Get, "/_routes", handlers::list_routes)
}

/// Build the router: relay endpoints, passthroughs, meta endpoints, static files
pub(crate) fn build_router(
    config: &Config,
    shutdown: CancellationToken,
    static_dir: Option<&Path>,
) -> Result<Router> {
    let RouteTable {
        mut router,
        listing,
    } = route_table();
    let state = ProxyState::new(config, shutdown, listing)?;

    if let Some(dir) = static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router = router.layer(TraceLayer::new_for_http());
    if config.relay.cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    Ok(router.with_state(state))
}

/// Start the proxy server
///
/// Runs until `shutdown` is cancelled. Every request token is a child of
/// `shutdown`, so open event streams end at the same moment the listener stops.
pub async fn start_proxy(config: Config, shutdown: CancellationToken) -> Result<()> {
    let bind_addr = config.bind_addr;
    tracing::debug!("Upstream: {}", config.upstream_url);

    let static_dir = if config.static_dir.is_dir() {
        tracing::debug!("Serving static files from {}", config.static_dir.display());
        Some(config.static_dir.as_path())
    } else {
        tracing::debug!(
            "Static directory {} not found, static files disabled",
            config.static_dir.display()
        );
        None
    };

    let app = build_router(&config, shutdown.clone(), static_dir)?;

    tracing::info!("Starting proxy on {}", bind_addr);

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    tracing::info!("Proxy listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await
        .context("Server error")?;

    tracing::info!("Proxy server shut down gracefully");
    Ok(())
}
