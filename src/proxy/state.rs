//! Proxy state shared by every handler

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

use super::sse::RelayOptions;
use super::upstream::UpstreamClient;

/// Shared state for the proxy server
///
/// Nothing in here is mutable: requests share the upstream connection pool
/// and the shutdown signal, and keep all of their own state private.
#[derive(Clone)]
pub struct ProxyState {
    /// HTTP client for the inference server
    pub(super) upstream: UpstreamClient,
    /// Shape of outbound event streams
    pub(super) relay: RelayOptions,
    /// Parent of every per-request cancellation token
    pub(super) shutdown: CancellationToken,
    /// `METHOD /path` for every registered route (served by `/_routes`)
    pub(super) routes: Arc<[String]>,
}

impl ProxyState {
    pub fn new(config: &Config, shutdown: CancellationToken, routes: Vec<String>) -> Result<Self> {
        let upstream =
            UpstreamClient::new(&config.upstream_url, config.relay.pool_max_idle_per_host)?;

        Ok(Self {
            upstream,
            relay: RelayOptions {
                open_comment: config.relay.open_comment,
                stop_on_done: config.relay.stop_on_done,
            },
            shutdown,
            routes: routes.into(),
        })
    }
}
