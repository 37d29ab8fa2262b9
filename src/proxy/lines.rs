//! Line demultiplexing for newline-delimited JSON bodies
//!
//! The upstream writes one JSON record per line, but network chunks do not
//! respect line boundaries: a record can arrive split across any number of
//! reads, and a single read can carry several records. `LineSplitter` keeps
//! the unterminated tail (the carry-over buffer) between reads.
//!
//! The carry-over buffer holds raw bytes rather than text so that a multi-byte
//! UTF-8 character split across two chunks is reassembled before decoding.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::error::ProxyError;

/// Raw upstream body, chunk by chunk
pub(crate) type ByteStream = BoxStream<'static, Result<Bytes, ProxyError>>;

/// One-pass sequence of complete, non-blank lines
pub(crate) type LineStream = BoxStream<'static, Result<String, ProxyError>>;

/// Incremental splitter with a carry-over buffer
#[derive(Debug, Default)]
pub struct LineSplitter {
    carry: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every line it completes
    ///
    /// Blank and whitespace-only lines are dropped (keep-alives).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        // Only the new bytes can contain a terminator; the carry never does
        let scan_from = self.carry.len();
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut cursor = scan_from;
        while let Some(offset) = self.carry[cursor..].iter().position(|&b| b == b'\n') {
            let end = cursor + offset;
            if let Some(line) = decode_line(&self.carry[start..end]) {
                lines.push(line);
            }
            start = end + 1;
            cursor = start;
        }
        self.carry.drain(..start);
        lines
    }

    /// Flush the unterminated tail at end-of-stream
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.carry);
        decode_line(&rest)
    }

    /// Bytes currently held in the carry-over buffer
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);
    if line.trim().is_empty() {
        None
    } else {
        Some(line.into_owned())
    }
}

struct SplitState {
    body: ByteStream,
    splitter: LineSplitter,
    ready: VecDeque<String>,
    cancel: CancellationToken,
    exhausted: bool,
}

/// Turn an upstream body into a lazy stream of lines
///
/// Reaching end-of-body is a normal end. A read error is yielded once and
/// ends the stream. Cancellation ends the stream immediately: whatever is
/// buffered is discarded and the body (and with it the connection) is dropped.
pub(crate) fn split_lines(body: ByteStream, cancel: CancellationToken) -> LineStream {
    let state = SplitState {
        body,
        splitter: LineSplitter::new(),
        ready: VecDeque::new(),
        cancel,
        exhausted: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if st.cancel.is_cancelled() {
                return None;
            }
            if let Some(line) = st.ready.pop_front() {
                return Some((Ok(line), st));
            }
            if st.exhausted {
                return None;
            }

            let next = tokio::select! {
                biased;
                _ = st.cancel.cancelled() => return None,
                next = st.body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => st.ready.extend(st.splitter.push(&chunk)),
                Some(Err(e)) => {
                    st.exhausted = true;
                    st.ready.clear();
                    return Some((Err(e), st));
                }
                None => {
                    tracing::trace!(carry = st.splitter.pending(), "Upstream body ended");
                    st.exhausted = true;
                    st.ready.extend(st.splitter.finish());
                }
            }
        }
    })
    .boxed()
}
