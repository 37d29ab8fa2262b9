//! Upstream transport - HTTP calls to the inference server
//!
//! One `reqwest::Client` is shared by every request. It carries no request
//! timeout: generation can legitimately take minutes, and the only things that
//! end a call are completion, an upstream error, or cancellation. Pooled
//! connections hold no per-request state, so reuse across concurrent requests
//! is safe.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header::CONTENT_TYPE, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use super::error::ProxyError;
use super::lines::ByteStream;

/// What the upstream answered once its headers arrived
pub(crate) enum UpstreamReply {
    /// Success: newline-delimited JSON records will follow
    Lines(ByteStream),
    /// Non-success: the whole body, to be reported as one error frame
    Failed { status: StatusCode, body: String },
}

impl std::fmt::Debug for UpstreamReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamReply::Lines(_) => f.write_str("Lines(..)"),
            UpstreamReply::Failed { status, body } => f
                .debug_struct("Failed")
                .field("status", status)
                .field("body", body)
                .finish(),
        }
    }
}

/// Buffered answer of a one-shot passthrough call
#[derive(Debug)]
pub(crate) struct ForwardedResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

/// Client for the configured upstream base address
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: Arc<str>,
}

impl UpstreamClient {
    /// Build the shared client
    pub fn new(base_url: &str, pool_max_idle_per_host: usize) -> Result<Self> {
        // NOTE: deliberately no `.timeout(..)` - streams run as long as the model does
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(pool_max_idle_per_host)
            .http1_only()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a streaming request and return as soon as headers are in
    ///
    /// `reqwest::RequestBuilder::send` resolves once the status line and
    /// headers are read; the body is left on the wire for the caller.
    pub(crate) async fn open_stream(
        &self,
        path: &str,
        payload: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<UpstreamReply, ProxyError> {
        let request = self
            .client
            .post(self.url(path))
            .header(CONTENT_TYPE, "application/json")
            .body(payload);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProxyError::Canceled),
            response = request.send() => response.map_err(unreachable_error)?,
        };

        let status = response.status();
        tracing::debug!("Upstream {} answered {}", path, status);

        if !status.is_success() {
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProxyError::Canceled),
                body = response.text() => body.map_err(unreachable_error)?,
            };
            return Ok(UpstreamReply::Failed { status, body });
        }

        Ok(UpstreamReply::Lines(
            response.bytes_stream().map_err(unreachable_error).boxed(),
        ))
    }

    /// One-shot call: send the body verbatim, buffer the whole answer
    pub(crate) async fn forward(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<ForwardedResponse, ProxyError> {
        let mut request = self.client.request(method, self.url(path));
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        let response = request.send().await.map_err(unreachable_error)?;
        let status = response.status();
        let content_type = response.headers().get(CONTENT_TYPE).cloned();
        let body = response.bytes().await.map_err(unreachable_error)?;

        Ok(ForwardedResponse {
            status,
            content_type,
            body,
        })
    }
}

fn unreachable_error(e: reqwest::Error) -> ProxyError {
    ProxyError::UpstreamUnreachable(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_open_stream_success_returns_body_stream() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/generate")
            .match_header("content-type", "application/json")
            .match_body(Matcher::JsonString(
                r#"{"model":"m","stream":true}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/x-ndjson")
            .with_body("{\"response\":\"a\",\"done\":false}\n{\"response\":\"\",\"done\":true}\n")
            .create_async()
            .await;

        let upstream = UpstreamClient::new(&server.url(), 2).unwrap();
        let reply = upstream
            .open_stream(
                "/api/generate",
                br#"{"model":"m","stream":true}"#.to_vec(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let UpstreamReply::Lines(body) = reply else {
            panic!("expected a line stream, got {:?}", reply);
        };
        let bytes: Vec<Bytes> = body.try_collect().await.unwrap();
        let text: String = bytes
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect();
        assert!(text.ends_with("\"done\":true}\n"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_open_stream_non_success_is_not_a_local_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(404)
            .with_body(r#"{"error":"model 'nope' not found"}"#)
            .create_async()
            .await;

        let upstream = UpstreamClient::new(&server.url(), 2).unwrap();
        let reply = upstream
            .open_stream("/api/chat", b"{}".to_vec(), &CancellationToken::new())
            .await
            .unwrap();

        match reply {
            UpstreamReply::Failed { status, body } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body, r#"{"error":"model 'nope' not found"}"#);
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_stream_unreachable() {
        // Port 9 (discard) on localhost is essentially never listening
        let upstream = UpstreamClient::new("http://127.0.0.1:9", 1).unwrap();
        let err = upstream
            .open_stream("/api/generate", b"{}".to_vec(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamUnreachable(_)));
    }

    #[tokio::test]
    async fn test_open_stream_already_canceled() {
        let upstream = UpstreamClient::new("http://127.0.0.1:9", 1).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = upstream
            .open_stream("/api/generate", b"{}".to_vec(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, ProxyError::Canceled);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_headers() {
        // Accepts the connection, never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let upstream = UpstreamClient::new(&format!("http://{}", addr), 1).unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            upstream.open_stream("/api/generate", b"{}".to_vec(), &cancel),
        )
        .await
        .expect("cancellation should end the wait for headers");
        assert_eq!(result.unwrap_err(), ProxyError::Canceled);
    }

    #[tokio::test]
    async fn test_forward_keeps_status_and_content_type() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_header("content-type", "application/json; charset=utf-8")
            .with_body(r#"{"models":[]}"#)
            .create_async()
            .await;

        let upstream = UpstreamClient::new(&format!("{}/", server.url()), 2).unwrap();
        let reply = upstream.forward(Method::GET, "/api/tags", None).await.unwrap();
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(
            reply.content_type.unwrap(),
            "application/json; charset=utf-8"
        );
        assert_eq!(&reply.body[..], br#"{"models":[]}"#);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let upstream = UpstreamClient::new("http://127.0.0.1:11434/", 1).unwrap();
        assert_eq!(upstream.base_url(), "http://127.0.0.1:11434");
        assert_eq!(upstream.url("/api/chat"), "http://127.0.0.1:11434/api/chat");
    }
}
