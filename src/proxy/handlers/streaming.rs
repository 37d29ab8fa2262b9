//! Streaming relay handlers
//!
//! Normalize → open upstream (headers only) → hand the body to the reframer.
//! Anything that fails before the upstream answers becomes a plain HTTP error;
//! after that, failures travel inside the event stream. With `open_comment`
//! the response is returned before the upstream is contacted, so every
//! upstream failure travels inside the stream.

use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, State},
    http::Response,
};

use futures::FutureExt;

use crate::proxy::error::ProxyError;
use crate::proxy::lifecycle::{self, generate_id, RequestLifecycle, RequestPhase};
use crate::proxy::normalize;
use crate::proxy::sse;
use crate::proxy::state::ProxyState;

/// `POST /api/ollama/generate/stream`
pub(crate) async fn generate_stream(
    State(state): State<ProxyState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response<Body>, ProxyError> {
    relay_stream(state, "/api/generate", read_body(body)?).await
}

/// `POST /api/ollama/chat/stream`
pub(crate) async fn chat_stream(
    State(state): State<ProxyState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response<Body>, ProxyError> {
    relay_stream(state, "/api/chat", read_body(body)?).await
}

pub(super) fn read_body(body: Result<Bytes, BytesRejection>) -> Result<Bytes, ProxyError> {
    body.map_err(|e| ProxyError::BodyRead(e.body_text()))
}

async fn relay_stream(
    state: ProxyState,
    upstream_path: &'static str,
    body: Bytes,
) -> Result<Response<Body>, ProxyError> {
    let mut lifecycle = RequestLifecycle::new(generate_id());
    tracing::debug!(
        request_id = %lifecycle.id(),
        body_size = body.len(),
        "Relaying stream to {}",
        upstream_path
    );

    lifecycle.advance(RequestPhase::Normalizing);
    let payload = match normalize::force_streaming(&body) {
        Ok(payload) => payload,
        Err(e) => {
            lifecycle.advance(RequestPhase::Errored);
            return Err(e);
        }
    };

    let cancel = lifecycle::request_token(&state.shutdown);
    lifecycle.advance(RequestPhase::AwaitingUpstreamHeaders);

    if state.relay.open_comment {
        let upstream = state.upstream.clone();
        let token = cancel.clone();
        let pending = async move { upstream.open_stream(upstream_path, payload, &token).await };
        let frames = sse::relay_pending(pending.boxed(), cancel, state.relay, lifecycle);
        return sse::event_stream_response(frames);
    }

    let reply = match state.upstream.open_stream(upstream_path, payload, &cancel).await {
        Ok(reply) => reply,
        Err(ProxyError::Canceled) => {
            lifecycle.cancel();
            return Err(ProxyError::Canceled);
        }
        Err(e) => {
            lifecycle.advance(RequestPhase::Errored);
            return Err(e);
        }
    };

    lifecycle.advance(RequestPhase::Streaming);
    let frames = sse::relay(reply, cancel, state.relay, lifecycle);
    sse::event_stream_response(frames)
}
