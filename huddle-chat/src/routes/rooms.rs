use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use huddle_shared::errors::{AppError, AppResult};
use huddle_shared::middleware::ValidatedJson;
use huddle_shared::types::api::{ApiMessage, ApiResponse};
use huddle_shared::types::auth::AuthUser;

use crate::models::{MemberRole, Membership, RoomKind, RoomSettings};
use crate::services::membership::{self, CreateRoom, UpdateRoom};
use crate::views::RoomDetail;
use crate::AppState;

// --- Request DTOs ---

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRoomRequest {
    #[validate(length(min = 1, max = 255, message = "the name must be between 1 and 255 characters"))]
    pub name: String,
    pub kind: RoomKind,
    #[validate(length(max = 1000, message = "the description may not be greater than 1000 characters"))]
    pub description: Option<String>,
    #[validate(url(message = "the avatar url must be a valid url"))]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub participant_ids: Vec<Uuid>,
    pub settings: Option<RoomSettings>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateRoomRequest {
    #[validate(length(max = 255, message = "the name may not be greater than 255 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 1000, message = "the description may not be greater than 1000 characters"))]
    pub description: Option<String>,
    #[validate(url(message = "the avatar url must be a valid url"))]
    pub avatar_url: Option<String>,
    pub settings: Option<RoomSettings>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddParticipantRequest {
    pub user_id: Uuid,
    pub role: Option<MemberRole>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct MuteRequest {
    #[validate(range(min = 1, max = 43200, message = "the duration must be between 1 and 43200 minutes"))]
    pub duration: Option<i64>,
}

// --- Handlers ---

/// GET /chat-rooms
pub async fn list_rooms(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<RoomDetail>>>> {
    let rooms = membership::list_rooms(state.store.as_ref(), auth_user.id)?;
    Ok(Json(ApiResponse::ok(rooms)))
}

/// POST /chat-rooms
pub async fn create_room(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<CreateRoomRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<RoomDetail>>)> {
    let room = membership::create_room(
        state.store.as_ref(),
        auth_user.id,
        CreateRoom {
            name: req.name,
            kind: req.kind,
            description: req.description,
            avatar_url: req.avatar_url,
            participant_ids: req.participant_ids,
            settings: req.settings,
        },
    )?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok_with_message(room, "Chat room created successfully")),
    ))
}

/// GET /chat-rooms/:id
pub async fn show_room(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<RoomDetail>>> {
    let room = membership::show_room(state.store.as_ref(), auth_user.id, room_id)?;
    Ok(Json(ApiResponse::ok(room)))
}

/// PUT /chat-rooms/:id
pub async fn update_room(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateRoomRequest>,
) -> AppResult<Json<ApiResponse<RoomDetail>>> {
    let room = membership::update_room(
        state.store.as_ref(),
        auth_user.id,
        room_id,
        UpdateRoom {
            name: req.name,
            description: req.description,
            avatar_url: req.avatar_url,
            settings: req.settings,
        },
    )?;
    Ok(Json(ApiResponse::ok_with_message(room, "Chat room updated successfully")))
}

/// DELETE /chat-rooms/:id
pub async fn delete_room(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<Uuid>,
) -> AppResult<Json<ApiMessage>> {
    membership::delete_room(state.store.as_ref(), auth_user.id, room_id)?;
    Ok(Json(ApiMessage::new("Chat room deleted successfully")))
}

/// POST /chat-rooms/:id/leave
pub async fn leave_room(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<Uuid>,
) -> AppResult<Json<ApiMessage>> {
    membership::leave(state.store.as_ref(), state.broadcaster.as_ref(), auth_user.id, room_id)?;
    Ok(Json(ApiMessage::new("You have left the chat room")))
}

/// POST /chat-rooms/:id/participants
pub async fn add_participant(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<AddParticipantRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Membership>>)> {
    let added = membership::add_participant(
        state.store.as_ref(),
        auth_user.id,
        room_id,
        req.user_id,
        req.role.unwrap_or(MemberRole::Member),
    )?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok_with_message(added, "Participant added successfully")),
    ))
}

/// DELETE /chat-rooms/:id/participants/:user
pub async fn remove_participant(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path((room_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ApiMessage>> {
    membership::remove_participant(
        state.store.as_ref(),
        state.broadcaster.as_ref(),
        auth_user.id,
        room_id,
        user_id,
    )?;
    Ok(Json(ApiMessage::new("Participant removed successfully")))
}

/// POST /chat-rooms/:id/participants/:user/mute
///
/// The body is optional; without one the mute is indefinite.
pub async fn mute_participant(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path((room_id, user_id)): Path<(Uuid, Uuid)>,
    body: Bytes,
) -> AppResult<Json<ApiResponse<Membership>>> {
    let req = if body.is_empty() {
        MuteRequest::default()
    } else {
        serde_json::from_slice::<MuteRequest>(&body).map_err(|e| AppError::validation(e.to_string()))?
    };
    req.validate()?;
    let muted = membership::mute(state.store.as_ref(), auth_user.id, room_id, user_id, req.duration)?;
    Ok(Json(ApiResponse::ok_with_message(muted, "Participant muted successfully")))
}

/// DELETE /chat-rooms/:id/participants/:user/mute
pub async fn unmute_participant(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path((room_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ApiResponse<Membership>>> {
    let unmuted = membership::unmute(state.store.as_ref(), auth_user.id, room_id, user_id)?;
    Ok(Json(ApiResponse::ok_with_message(unmuted, "Participant unmuted successfully")))
}
