//! Axum router for the replication server.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::state::ServerState;
use crate::ws;

/// Build the replication router.
///
/// - `GET /` -- replication `WebSocket` upgrade
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/", get(ws::ws_peer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
