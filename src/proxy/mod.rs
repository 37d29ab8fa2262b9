// Proxy module - HTTP gateway in front of a local inference server
//
// Clients post ordinary generation/chat requests; the gateway forces streaming
// on, opens the upstream call, and re-emits the upstream's newline-delimited
// JSON as a Server-Sent Events stream. The rest of the upstream API is
// forwarded as-is.
//
// Data flow of one relayed request:
//   handlers::streaming → normalize → upstream → lines → sse → client
// with lifecycle tracking the phase and owning cancellation.

mod error;
mod handlers;
mod lifecycle;
mod lines;
mod normalize;
mod server;
mod sse;
mod state;
mod upstream;

pub use server::start_proxy;
