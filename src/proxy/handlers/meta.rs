//! Liveness and route listing

use axum::{extract::State, Json};

use crate::proxy::state::ProxyState;

/// `GET /ping`
pub(crate) async fn ping() -> &'static str {
    "pong"
}

/// `GET /_routes`
pub(crate) async fn list_routes(State(state): State<ProxyState>) -> Json<Vec<String>> {
    Json(state.routes.to_vec())
}
