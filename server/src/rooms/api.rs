use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use uuid::Uuid;

use super::RoomSummary;
use crate::chat::message::validate_room_id;
use crate::error::StoreError;
use crate::fabric::FleetEvent;
use crate::state::AppState;
use crate::store;

/// Maximum room display name length (chars).
const MAX_ROOM_NAME_LENGTH: usize = 64;

// --- Request types ---

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
}

/// GET /api/rooms
pub async fn list_rooms(
    State(state): State<AppState>,
) -> Result<Json<Vec<RoomSummary>>, (StatusCode, String)> {
    store::blocking(state.directory.clone(), |d| d.list())
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to list rooms");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to list rooms".to_string())
        })
}

/// POST /api/rooms
///
/// Creates a named room. The new listing is pushed to every connection in the fleet.
pub async fn create_room(
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<RoomSummary>), (StatusCode, String)> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Room name cannot be empty".to_string()));
    }
    if name.chars().count() > MAX_ROOM_NAME_LENGTH {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Room name exceeds {MAX_ROOM_NAME_LENGTH} characters"),
        ));
    }
    let id = match req.id {
        Some(id) => validate_room_id(&id).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?,
        None => Uuid::now_v7().to_string(),
    };
    let icon = req.icon.map(|i| i.trim().to_string()).filter(|i| !i.is_empty());

    let room = RoomSummary::new(id, name, icon);
    let created = store::blocking(state.directory.clone(), move |d| d.create(room))
        .await
        .map_err(|e| match e {
            StoreError::Duplicate(id) => (StatusCode::CONFLICT, format!("Room {id} already exists")),
            other => {
                tracing::error!(error = %other, "Failed to create room");
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create room".to_string())
            }
        })?;

    state.fabric.publish(FleetEvent::RoomSummary {
        summary: created.clone(),
    });
    super::handlers::refresh_listing(&state).await;

    tracing::info!(room = %created.id, name = %created.name, "Room created");
    Ok((StatusCode::CREATED, Json(created)))
}
