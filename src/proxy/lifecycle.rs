//! Per-request lifecycle and cancellation
//!
//! Every relayed request walks one path through
//!
//! ```text
//! Received → Normalizing → AwaitingUpstreamHeaders → Streaming → Completed
//!                │                   │                   │   └→ Errored
//!                └───────────────────┴────→ Errored      └─────→ Canceled
//! ```
//!
//! `Canceled` is reachable from every non-terminal phase. The three outcome
//! phases are terminal: once reached, further transitions are ignored.
//!
//! Cancellation itself is a `CancellationToken`. Each request gets a child of
//! the server's shutdown token, so shutting down cancels every stream, and
//! the outbound body holds a drop guard so a client disconnect cancels it too.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

/// Generate a request id: `<unix millis>-<counter>`
pub fn generate_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", Utc::now().timestamp_millis(), count)
}

/// Where a relayed request currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Received,
    Normalizing,
    AwaitingUpstreamHeaders,
    Streaming,
    Completed,
    Errored,
    Canceled,
}

impl RequestPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestPhase::Completed | RequestPhase::Errored | RequestPhase::Canceled
        )
    }

    /// Whether `self → next` is a legal step
    pub fn can_advance_to(self, next: RequestPhase) -> bool {
        use RequestPhase::*;

        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Canceled)
                | (Received, Normalizing)
                | (Normalizing, AwaitingUpstreamHeaders)
                | (Normalizing, Errored)
                | (AwaitingUpstreamHeaders, Streaming)
                | (AwaitingUpstreamHeaders, Errored)
                | (Streaming, Completed)
                | (Streaming, Errored)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestPhase::Received => "received",
            RequestPhase::Normalizing => "normalizing",
            RequestPhase::AwaitingUpstreamHeaders => "awaiting_upstream_headers",
            RequestPhase::Streaming => "streaming",
            RequestPhase::Completed => "completed",
            RequestPhase::Errored => "errored",
            RequestPhase::Canceled => "canceled",
        }
    }
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State machine for one relayed request
#[derive(Debug)]
pub struct RequestLifecycle {
    id: String,
    phase: RequestPhase,
    started: Instant,
}

impl RequestLifecycle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            phase: RequestPhase::Received,
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> RequestPhase {
        self.phase
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Move to `next` if legal. Returns whether the phase changed.
    pub fn advance(&mut self, next: RequestPhase) -> bool {
        if !self.phase.can_advance_to(next) {
            if self.phase != next {
                tracing::trace!(
                    request_id = %self.id,
                    "Ignoring transition {} -> {}",
                    self.phase,
                    next
                );
            }
            return false;
        }

        tracing::debug!(request_id = %self.id, "{} -> {}", self.phase, next);
        self.phase = next;

        if next.is_terminal() {
            let elapsed_ms = self.elapsed().as_millis() as u64;
            match next {
                RequestPhase::Completed => {
                    tracing::info!(request_id = %self.id, elapsed_ms, "Relay completed")
                }
                RequestPhase::Errored => {
                    tracing::warn!(request_id = %self.id, elapsed_ms, "Relay ended with an error")
                }
                _ => tracing::info!(request_id = %self.id, elapsed_ms, "Relay canceled"),
            }
        }
        true
    }

    /// Shorthand for `advance(Canceled)`; idempotent
    pub fn cancel(&mut self) -> bool {
        self.advance(RequestPhase::Canceled)
    }
}

impl Drop for RequestLifecycle {
    fn drop(&mut self) {
        // Dropped mid-flight: axum dropped the handler future or hyper dropped
        // the body, i.e. the client went away
        if !self.phase.is_terminal() {
            self.cancel();
        }
    }
}

/// Derive the cancellation signal for one request from the server-wide one
pub fn request_token(shutdown: &CancellationToken) -> CancellationToken {
    shutdown.child_token()
}

#[cfg(test)]
mod tests {
    use super::*;
    use RequestPhase::*;

    #[test]
    fn test_happy_path() {
        let mut lc = RequestLifecycle::new("r1");
        assert_eq!(lc.phase(), Received);
        for next in [Normalizing, AwaitingUpstreamHeaders, Streaming, Completed] {
            assert!(lc.advance(next), "should reach {}", next);
        }
        assert_eq!(lc.phase(), Completed);
    }

    #[test]
    fn test_terminal_phases_are_sticky() {
        let mut lc = RequestLifecycle::new("r2");
        lc.advance(Normalizing);
        lc.advance(Errored);
        assert!(!lc.cancel());
        assert!(!lc.advance(Streaming));
        assert_eq!(lc.phase(), Errored);
    }

    #[test]
    fn test_cancel_from_every_non_terminal_phase() {
        for phase in [Received, Normalizing, AwaitingUpstreamHeaders, Streaming] {
            assert!(phase.can_advance_to(Canceled), "{} -> canceled", phase);
        }
        for phase in [Completed, Errored, Canceled] {
            assert!(!phase.can_advance_to(Canceled));
        }
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut lc = RequestLifecycle::new("r3");
        assert!(lc.cancel());
        assert!(!lc.cancel());
        assert_eq!(lc.phase(), Canceled);
    }

    #[test]
    fn test_drop_while_streaming_counts_as_cancel() {
        // Only observable through logs; must not panic on a terminal phase either
        let mut lc = RequestLifecycle::new("r4");
        lc.advance(Normalizing);
        drop(lc);

        let mut done = RequestLifecycle::new("r5");
        done.advance(Normalizing);
        done.advance(Errored);
        drop(done);
    }

    #[test]
    fn test_no_skipping_ahead() {
        assert!(!Received.can_advance_to(Streaming));
        assert!(!Normalizing.can_advance_to(Completed));
        assert!(!AwaitingUpstreamHeaders.can_advance_to(Completed));
        assert!(!Streaming.can_advance_to(Normalizing));
    }

    #[test]
    fn test_request_token_follows_shutdown() {
        let shutdown = CancellationToken::new();
        let a = request_token(&shutdown);
        let b = request_token(&shutdown);

        a.cancel();
        assert!(!shutdown.is_cancelled());
        assert!(!b.is_cancelled());

        shutdown.cancel();
        assert!(b.is_cancelled());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
    }
}
