use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use huddle_shared::errors::AppResult;
use huddle_shared::middleware::ValidatedJson;
use huddle_shared::types::api::ApiResponse;
use huddle_shared::types::auth::AuthUser;
use huddle_shared::types::pagination::{Paginated, PaginationParams};
use huddle_shared::types::request::RequestMeta;

use crate::models::{MediaRef, MessageKind};
use crate::services::messages::{self, SendMessage, LIST_PAGE_SIZE, SEARCH_PAGE_SIZE};
use crate::views::MessageView;
use crate::AppState;

// --- Request DTOs ---

#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageRequest {
    #[validate(length(max = 10000, message = "the content may not be greater than 10000 characters"))]
    pub content: Option<String>,
    pub kind: Option<MessageKind>,
    #[validate(url(message = "the media url must be a valid url"))]
    pub media_url: Option<String>,
    #[validate(length(max = 255, message = "the media filename may not be greater than 255 characters"))]
    pub media_filename: Option<String>,
    #[validate(range(min = 0, message = "the media size must be at least 0"))]
    pub media_size: Option<i64>,
    pub reply_to_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EditMessageRequest {
    #[validate(length(min = 1, max = 10000, message = "the content must be between 1 and 10000 characters"))]
    pub content: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReactionRequest {
    #[validate(length(min = 1, max = 10, message = "the emoji must be between 1 and 10 characters"))]
    pub emoji: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForwardRequest {
    #[validate(length(min = 1, max = 50, message = "between 1 and 50 chat rooms must be given"))]
    pub room_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
    #[serde(default = "first_page")]
    pub page: u64,
}

fn first_page() -> u64 { 1 }

// --- Handlers ---

/// GET /chat-rooms/:id/messages
pub async fn list_messages(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<Uuid>,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<ApiResponse<Paginated<MessageView>>>> {
    let page = messages::list(state.store.as_ref(), auth_user.id, room_id, params.sized(LIST_PAGE_SIZE))?;
    Ok(Json(ApiResponse::ok(page)))
}

/// GET /chat-rooms/:id/messages/search?query=
pub async fn search_messages(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<Uuid>,
    Query(params): Query<SearchParams>,
) -> AppResult<Json<ApiResponse<Paginated<MessageView>>>> {
    let page = messages::search(
        state.store.as_ref(),
        auth_user.id,
        room_id,
        &params.query,
        PaginationParams { page: params.page }.sized(SEARCH_PAGE_SIZE),
    )?;
    Ok(Json(ApiResponse::ok(page)))
}

/// POST /chat-rooms/:id/messages
pub async fn send_message(
    auth_user: AuthUser,
    meta: RequestMeta,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<MessageView>>)> {
    let media = req.media_url.map(|url| MediaRef {
        url,
        filename: req.media_filename,
        size: req.media_size,
    });

    let view = messages::send(
        state.store.as_ref(),
        state.broadcaster.as_ref(),
        auth_user.id,
        &meta,
        room_id,
        SendMessage {
            content: req.content,
            kind: req.kind.unwrap_or(MessageKind::Text),
            media,
            reply_to_id: req.reply_to_id,
        },
    )?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok_with_message(view, "Message sent successfully")),
    ))
}

/// PUT /chat-rooms/:id/messages/:mid
pub async fn edit_message(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
    ValidatedJson(req): ValidatedJson<EditMessageRequest>,
) -> AppResult<Json<ApiResponse<MessageView>>> {
    let view = messages::edit(
        state.store.as_ref(),
        state.broadcaster.as_ref(),
        auth_user.id,
        room_id,
        message_id,
        &req.content,
    )?;
    Ok(Json(ApiResponse::ok_with_message(view, "Message updated successfully")))
}

/// DELETE /chat-rooms/:id/messages/:mid
pub async fn delete_message(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ApiResponse<MessageView>>> {
    let view = messages::soft_delete(
        state.store.as_ref(),
        state.broadcaster.as_ref(),
        auth_user.id,
        room_id,
        message_id,
    )?;
    Ok(Json(ApiResponse::ok_with_message(view, "Message deleted successfully")))
}

/// POST /chat-rooms/:id/messages/:mid/reactions
pub async fn add_reaction(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
    ValidatedJson(req): ValidatedJson<ReactionRequest>,
) -> AppResult<Json<ApiResponse<MessageView>>> {
    let view = messages::react(
        state.store.as_ref(),
        state.broadcaster.as_ref(),
        auth_user.id,
        room_id,
        message_id,
        &req.emoji,
    )?;
    Ok(Json(ApiResponse::ok(view)))
}

/// DELETE /chat-rooms/:id/messages/:mid/reactions
pub async fn remove_reaction(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
    ValidatedJson(req): ValidatedJson<ReactionRequest>,
) -> AppResult<Json<ApiResponse<MessageView>>> {
    let view = messages::unreact(
        state.store.as_ref(),
        state.broadcaster.as_ref(),
        auth_user.id,
        room_id,
        message_id,
        &req.emoji,
    )?;
    Ok(Json(ApiResponse::ok(view)))
}

/// POST /chat-rooms/:id/messages/:mid/forward
pub async fn forward_message(
    auth_user: AuthUser,
    meta: RequestMeta,
    State(state): State<Arc<AppState>>,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
    ValidatedJson(req): ValidatedJson<ForwardRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Vec<MessageView>>>)> {
    let forwarded = messages::forward(
        state.store.as_ref(),
        state.broadcaster.as_ref(),
        auth_user.id,
        &meta,
        room_id,
        message_id,
        &req.room_ids,
    )?;
    let note = format!("Message forwarded to {} chat room(s)", forwarded.len());
    Ok((StatusCode::CREATED, Json(ApiResponse::ok_with_message(forwarded, note))))
}
