// SSE (Server-Sent Events) framing module
//
// This module turns the upstream's newline-delimited JSON into the outbound
// event stream. Every unit on the wire has the form:
// ```
// data: <payload>
//
// ```
// where `<payload>` is one of:
// - the upstream record, verbatim
// - `{"error":"<raw upstream body>"}` when the upstream failed
// - `[DONE]`, the terminal marker after a normal end
//
// # Pipeline
//
// The outbound body is a pull-driven stream: hyper polls it only when it is
// ready to write, each poll reads at most one upstream record, and each
// yielded frame goes out as its own body chunk (written and flushed before
// the next poll). There is no queue and no writer task, so frames leave in
// exactly the order records arrived.
//
// # Termination
//
// Exactly one terminal frame is sent:
// - upstream non-success → one error frame, no `[DONE]`
// - body read failure mid-stream → one error frame, no `[DONE]`
// - end of body, or a record with `"done": true` → `[DONE]`
// - cancellation → nothing more at all
//
// With `open_comment` the response is committed before the upstream has
// answered: the comment goes out first and the upstream call is awaited on
// the next poll. A connection failure at that point is reported as the
// single error frame, since a status code can no longer be sent.

use std::convert::Infallible;

use axum::{
    body::Body,
    http::{header, Response, StatusCode},
};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::json;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::error::ProxyError;
use super::lifecycle::{RequestLifecycle, RequestPhase};
use super::lines::{split_lines, LineStream};
use super::upstream::UpstreamReply;

/// Payload of the terminal marker frame
pub const DONE_MARKER: &str = "[DONE]";

/// Outbound body: encoded frames, one per chunk
pub(crate) type FrameStream = BoxStream<'static, Result<Bytes, Infallible>>;

/// Upstream call whose headers have not arrived yet
pub(crate) type PendingReply = BoxFuture<'static, Result<UpstreamReply, ProxyError>>;

// ============================================================================
// Frames
// ============================================================================

/// One outbound event-stream unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A forwarded upstream record
    Record(String),
    /// An error body, wrapped as `{"error": ...}`
    Error(String),
    /// The terminal marker
    Done,
    /// Empty comment, used to commit headers before the upstream answers
    Comment,
}

impl Frame {
    /// Wire encoding of this frame
    pub fn encode(&self) -> Bytes {
        match self {
            Frame::Record(line) => Bytes::from(format!("data: {}\n\n", line)),
            Frame::Error(body) => Bytes::from(format!("data: {}\n\n", json!({ "error": body }))),
            Frame::Done => Bytes::from(format!("data: {}\n\n", DONE_MARKER)),
            Frame::Comment => Bytes::from_static(b":\n\n"),
        }
    }
}

// ============================================================================
// Completion detection
// ============================================================================

/// Check whether a record carries `"done": true`
///
/// Lines that are not JSON objects are never completion records; they are
/// still forwarded untouched by the caller.
pub fn is_completion_record(line: &str) -> bool {
    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(value) => value.get("done").and_then(|d| d.as_bool()) == Some(true),
        Err(e) => {
            tracing::debug!("Upstream record is not valid JSON ({}): {}", e, line);
            false
        }
    }
}

// ============================================================================
// Reframer
// ============================================================================

/// Options that shape the outbound stream
#[derive(Debug, Clone, Copy)]
pub struct RelayOptions {
    /// Send a `:` comment first so headers are committed immediately
    pub open_comment: bool,
    /// End right after a `"done": true` record instead of waiting for EOF
    pub stop_on_done: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            open_comment: false,
            stop_on_done: true,
        }
    }
}

enum Stage {
    /// Waiting for upstream headers
    Connecting(PendingReply),
    /// Upstream refused; its body becomes the single error frame
    Failed(String),
    /// Reading records
    Streaming(LineStream),
    /// Completion seen; only the marker is left
    Closing,
    Finished,
}

struct Reframer {
    stage: Stage,
    open_comment: bool,
    stop_on_done: bool,
    cancel: CancellationToken,
    lifecycle: RequestLifecycle,
    records: usize,
    // Cancels the token when the body is dropped (client went away)
    _guard: DropGuard,
}

impl Reframer {
    fn new(
        stage: Stage,
        cancel: CancellationToken,
        options: RelayOptions,
        lifecycle: RequestLifecycle,
    ) -> Self {
        Self {
            stage,
            open_comment: options.open_comment,
            stop_on_done: options.stop_on_done,
            _guard: cancel.clone().drop_guard(),
            cancel,
            lifecycle,
            records: 0,
        }
    }

    fn stage_for(&self, reply: UpstreamReply) -> Stage {
        match reply {
            UpstreamReply::Lines(body) => Stage::Streaming(split_lines(body, self.cancel.clone())),
            UpstreamReply::Failed { status, body } => {
                tracing::warn!(
                    request_id = %self.lifecycle.id(),
                    "Upstream returned {}: {}",
                    status,
                    body
                );
                Stage::Failed(body)
            }
        }
    }

    async fn next_frame(&mut self) -> Option<Frame> {
        if self.cancel.is_cancelled() {
            self.abandon();
            return None;
        }

        if std::mem::take(&mut self.open_comment) {
            return Some(Frame::Comment);
        }

        loop {
            return match std::mem::replace(&mut self.stage, Stage::Finished) {
                Stage::Connecting(pending) => match pending.await {
                    Ok(reply) => {
                        self.lifecycle.advance(RequestPhase::Streaming);
                        self.stage = self.stage_for(reply);
                        continue;
                    }
                    Err(ProxyError::Canceled) => {
                        self.abandon();
                        None
                    }
                    Err(e) => {
                        tracing::warn!(
                            request_id = %self.lifecycle.id(),
                            "Upstream failed after headers were sent: {}",
                            e
                        );
                        self.lifecycle.advance(RequestPhase::Errored);
                        Some(Frame::Error(e.to_string()))
                    }
                },
                Stage::Failed(body) => {
                    self.lifecycle.advance(RequestPhase::Errored);
                    Some(Frame::Error(body))
                }
                Stage::Streaming(mut lines) => match lines.next().await {
                    Some(Ok(line)) => {
                        self.records += 1;
                        self.stage = if self.stop_on_done && is_completion_record(&line) {
                            // Dropping `lines` here releases the upstream connection
                            Stage::Closing
                        } else {
                            Stage::Streaming(lines)
                        };
                        Some(Frame::Record(line))
                    }
                    Some(Err(e)) => {
                        tracing::warn!(
                            request_id = %self.lifecycle.id(),
                            records = self.records,
                            "Upstream stream broke: {}",
                            e
                        );
                        self.lifecycle.advance(RequestPhase::Errored);
                        Some(Frame::Error(e.to_string()))
                    }
                    None if self.cancel.is_cancelled() => {
                        self.abandon();
                        None
                    }
                    None => self.close(),
                },
                Stage::Closing => self.close(),
                Stage::Finished => None,
            };
        }
    }

    fn close(&mut self) -> Option<Frame> {
        tracing::debug!(
            request_id = %self.lifecycle.id(),
            records = self.records,
            "Upstream stream ended"
        );
        self.lifecycle.advance(RequestPhase::Completed);
        Some(Frame::Done)
    }

    fn abandon(&mut self) {
        self.stage = Stage::Finished;
        let interrupted = self.lifecycle.phase();
        if self.lifecycle.cancel() {
            tracing::debug!(
                request_id = %self.lifecycle.id(),
                records = self.records,
                "Stopped relaying after cancellation while {}",
                interrupted
            );
        }
    }
}

/// Build the outbound frame stream for one request
///
/// `lifecycle` should be in `Streaming`; the stream drives it to its outcome.
pub(crate) fn relay(
    reply: UpstreamReply,
    cancel: CancellationToken,
    options: RelayOptions,
    lifecycle: RequestLifecycle,
) -> FrameStream {
    let mut reframer = Reframer::new(Stage::Finished, cancel, options, lifecycle);
    reframer.stage = reframer.stage_for(reply);
    frames(reframer)
}

/// Like [`relay`], but the upstream headers are awaited inside the stream
///
/// Used with `open_comment`, where the response goes out before the upstream
/// has answered. `lifecycle` should be in `AwaitingUpstreamHeaders`.
pub(crate) fn relay_pending(
    pending: PendingReply,
    cancel: CancellationToken,
    options: RelayOptions,
    lifecycle: RequestLifecycle,
) -> FrameStream {
    frames(Reframer::new(Stage::Connecting(pending), cancel, options, lifecycle))
}

fn frames(reframer: Reframer) -> FrameStream {
    stream::unfold(reframer, |mut reframer| async move {
        let frame = reframer.next_frame().await?;
        Some((Ok(frame.encode()), reframer))
    })
    .fuse()
    .boxed()
}

// ============================================================================
// HTTP response
// ============================================================================

/// Wrap a frame stream in a `text/event-stream` response
///
/// Caching is disabled end to end and `X-Accel-Buffering: no` keeps nginx-style
/// intermediaries from holding frames back.
pub(crate) fn event_stream_response(frames: FrameStream) -> Result<Response<Body>, ProxyError> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(frames))
        .map_err(|e| ProxyError::ResponseBuild(e.to_string()))
}
