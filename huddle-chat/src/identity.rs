use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use huddle_shared::middleware::authenticate_bearer;
use huddle_shared::types::auth::AuthUser;

use crate::AppState;

/// Users live with the identity provider. A valid bearer token is enough to
/// materialise the caller's row here, so memberships and messages can point at it.
///
/// Requests without a usable token pass untouched; the `AuthUser` extractor
/// rejects them where a route needs one.
pub async fn register_caller(State(state): State<Arc<AppState>>, mut req: Request, next: Next) -> Response {
    let claims = match authenticate_bearer(req.headers(), &state.config.jwt_secret) {
        Ok(claims) => claims,
        Err(_) => return next.run(req).await,
    };

    if let Err(e) = state.store.ensure_user(claims.sub, claims.name.as_deref()) {
        tracing::error!(user_id = %claims.sub, error = %e, "failed to register caller");
        return e.into_response();
    }

    req.extensions_mut().insert(AuthUser::from(claims));
    next.run(req).await
}
