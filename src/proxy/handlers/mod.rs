//! Request handlers for the gateway
//!
//! - `streaming`: the relay endpoints (`.../generate/stream`, `.../chat/stream`)
//! - `passthrough`: one-shot forwarding of the rest of the upstream API
//! - `meta`: `/ping` and `/_routes`

mod meta;
mod passthrough;
mod streaming;

pub(crate) use meta::{list_routes, ping};
pub(crate) use passthrough::{passthrough, Verb, PASSTHROUGH};
pub(crate) use streaming::{chat_stream, generate_stream};

/// Prefix of every upstream-facing route
pub(crate) const API_PREFIX: &str = "/api/ollama";
