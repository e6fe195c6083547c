use axum::{extract::State, Json, Router};
use serde::Serialize;

use crate::rooms::api as rooms_api;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub node_id: String,
    pub connections: usize,
    pub version: &'static str,
}

/// Build the full axum Router with all routes.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (clients identify in-band)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    let room_routes = Router::new().route(
        "/api/rooms",
        axum::routing::get(rooms_api::list_rooms).post(rooms_api::create_room),
    );

    let health = Router::new().route("/api/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(room_routes)
        .merge(health)
        .with_state(state)
}

/// GET /api/health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        node_id: state.node_id.to_string(),
        connections: state.connections.len(),
        version: env!("CARGO_PKG_VERSION"),
    })
}
