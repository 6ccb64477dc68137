use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use huddle_shared::errors::AppResult;
use huddle_shared::middleware::ValidatedJson;
use huddle_shared::types::api::ApiResponse;
use huddle_shared::types::auth::AuthUser;

use crate::models::{User, UserStatus};
use crate::services::presence;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateStatusRequest {
    pub status: UserStatus,
}

/// PUT /users/me/status
pub async fn update_status(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<UpdateStatusRequest>,
) -> AppResult<Json<ApiResponse<User>>> {
    let user = presence::update_status(
        state.store.as_ref(),
        state.broadcaster.as_ref(),
        auth_user.id,
        req.status,
    )?;
    Ok(Json(ApiResponse::ok_with_message(user, "Status updated successfully")))
}
