//! Proxy error types and response handling
//!
//! These errors only ever become an HTTP response *before* an event stream has
//! been committed. Once streaming starts, failures are reported as error frames
//! inside the stream instead (see `sse`).

use std::fmt;

use axum::{
    body::Body,
    http::{Response, StatusCode},
    response::IntoResponse,
};

/// Errors that can occur during relaying
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ProxyError {
    /// Inbound body is not a JSON object
    MalformedRequest(String),
    /// Upstream could not be reached, or the connection broke while reading
    UpstreamUnreachable(String),
    /// Inbound body could not be read
    BodyRead(String),
    /// Outbound response could not be assembled
    ResponseBuild(String),
    /// The request was canceled (client gone or server shutting down)
    Canceled,
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::MalformedRequest(msg) => write!(f, "malformed request: {}", msg),
            ProxyError::UpstreamUnreachable(msg) => write!(f, "upstream unreachable: {}", msg),
            ProxyError::BodyRead(msg) => write!(f, "failed to read body: {}", msg),
            ProxyError::ResponseBuild(msg) => write!(f, "failed to build response: {}", msg),
            ProxyError::Canceled => write!(f, "request canceled"),
        }
    }
}

impl std::error::Error for ProxyError {}

impl ProxyError {
    /// HTTP status used when the error is reported before streaming starts
    pub(crate) fn status(&self) -> StatusCode {
        match self {
            ProxyError::MalformedRequest(_) | ProxyError::BodyRead(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::ResponseBuild(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Canceled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<Body> {
        let status = self.status();

        // Cancellation is not an error from anyone's point of view
        if self == ProxyError::Canceled {
            tracing::debug!("Request canceled before streaming started");
        } else {
            tracing::error!("Proxy error: {} - {}", status, self);
        }

        Response::builder()
            .status(status)
            .body(Body::from(self.to_string()))
            .unwrap_or_else(|_| Response::new(Body::from("Internal error building error response")))
    }
}
