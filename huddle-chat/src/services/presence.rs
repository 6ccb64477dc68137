use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use huddle_shared::{AppError, AppResult, ErrorCode};

use crate::broadcast::{self, Broadcaster, Channel, USER_STATUS};
use crate::models::{User, UserStatus};
use crate::store::ChatStore;

/// Persist the caller's status, stamp `last_seen` and tell every subscriber of `users`.
pub fn update_status(
    store: &dyn ChatStore,
    hub: &dyn Broadcaster,
    actor: Uuid,
    status: UserStatus,
) -> AppResult<User> {
    let user = store
        .update_user_status(actor, status, Utc::now())?
        .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, "user not found"))?;

    tracing::info!(actor = %actor, status = %status, "status updated");

    broadcast::publish(
        hub,
        &Channel::Users,
        USER_STATUS,
        json!({
            "user_id": user.id,
            "status": user.status,
            "last_seen": user.last_seen,
        }),
        None,
    );
    Ok(user)
}
