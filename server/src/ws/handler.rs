use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};

use crate::state::AppState;
use crate::ws::actor;

/// Headroom over the attachment limit for the JSON envelope around it.
const FRAME_OVERHEAD: usize = 64 * 1024;

/// GET /ws
/// WebSocket upgrade endpoint. Clients identify themselves with `user:online` or
/// `room:join` after connecting; there is no authentication.
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let max_frame = state.settings.max_attachment_bytes + FRAME_OVERHEAD;
    ws.max_message_size(max_frame)
        .max_frame_size(max_frame)
        .on_upgrade(move |socket| actor::run_connection(socket, state))
}
