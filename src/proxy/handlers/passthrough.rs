//! One-shot forwarding of the non-streaming upstream API
//!
//! Bodies go out byte-for-byte and the upstream answer comes back with its
//! status code and content type. Nothing is reframed here.

use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, MatchedPath, State},
    handler::Handler,
    http::{header::CONTENT_TYPE, Method, Response},
    routing::{on, MethodFilter, MethodRouter},
};
use serde::de::IgnoredAny;

use super::streaming::read_body;
use super::API_PREFIX;
use crate::proxy::error::ProxyError;
use crate::proxy::state::ProxyState;

/// HTTP method of a gateway route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verb {
    Get,
    Post,
    Delete,
}

impl Verb {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Delete => "DELETE",
        }
    }

    fn filter(self) -> MethodFilter {
        match self {
            Verb::Get => MethodFilter::GET,
            Verb::Post => MethodFilter::POST,
            Verb::Delete => MethodFilter::DELETE,
        }
    }

    /// Mount `handler` for this method only
    pub(crate) fn route<H, T>(self, handler: H) -> MethodRouter<ProxyState>
    where
        H: Handler<T, ProxyState>,
        T: 'static,
    {
        on(self.filter(), handler)
    }
}

/// `(method, name)`: served at `/api/ollama/<name>`, forwarded to `/api/<name>`
pub(crate) const PASSTHROUGH: &[(Verb, &str)] = &[
    (Verb::Post, "generate"),
    (Verb::Post, "chat"),
    (Verb::Post, "embeddings"),
    (Verb::Post, "pull"),
    (Verb::Post, "show"),
    (Verb::Post, "create"),
    (Verb::Post, "copy"),
    (Verb::Post, "unload"),
    (Verb::Get, "version"),
    (Verb::Get, "tags"),
    (Verb::Delete, "delete"),
];

/// Upstream path for a gateway route: `/api/ollama/tags` → `/api/tags`
pub(crate) fn upstream_path(route: &str) -> String {
    let name = route
        .strip_prefix(API_PREFIX)
        .unwrap_or(route)
        .trim_start_matches('/');
    format!("/api/{}", name)
}

/// Handler for every entry of `PASSTHROUGH`
pub(crate) async fn passthrough(
    State(state): State<ProxyState>,
    method: Method,
    matched: MatchedPath,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response<Body>, ProxyError> {
    let body = read_body(body)?;
    let path = upstream_path(matched.as_str());

    let body = if method == Method::GET {
        None
    } else {
        // Validate only; the original bytes are what goes upstream
        serde_json::from_slice::<IgnoredAny>(&body)
            .map_err(|e| ProxyError::MalformedRequest(e.to_string()))?;
        Some(body)
    };

    tracing::debug!("Forwarding {} {}", method, path);
    let reply = state.upstream.forward(method, &path, body).await?;
    if !reply.status.is_success() {
        tracing::info!("Upstream {} answered {}", path, reply.status);
    }

    let mut response = Response::builder().status(reply.status);
    if let Some(content_type) = reply.content_type {
        response = response.header(CONTENT_TYPE, content_type);
    }
    response
        .body(Body::from(reply.body))
        .map_err(|e| ProxyError::ResponseBuild(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_path_mapping() {
        assert_eq!(upstream_path("/api/ollama/tags"), "/api/tags");
        assert_eq!(upstream_path("/api/ollama/delete"), "/api/delete");
    }

    #[test]
    fn test_table_covers_upstream_api() {
        let posts = PASSTHROUGH.iter().filter(|(v, _)| *v == Verb::Post).count();
        assert_eq!(posts, 8);
        assert!(PASSTHROUGH.contains(&(Verb::Get, "tags")));
        assert!(PASSTHROUGH.contains(&(Verb::Delete, "delete")));
    }
}
