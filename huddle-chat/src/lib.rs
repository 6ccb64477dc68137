pub mod access;
pub mod audit;
pub mod broadcast;
pub mod config;
pub mod gate;
pub mod identity;
pub mod models;
pub mod routes;
pub mod schema;
pub mod services;
pub mod store;
pub mod views;

use std::sync::Arc;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post, put};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use socketioxide::layer::SocketIoLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use huddle_shared::middleware::metrics_middleware;

use crate::broadcast::Broadcaster;
use crate::config::AppConfig;
use crate::routes::{health, messages, moderation, rooms, users};
use crate::store::ChatStore;

pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub config: AppConfig,
    pub metrics_handle: Option<PrometheusHandle>,
}

/// The full HTTP surface. The ip gate wraps everything, the socket layer included.
pub fn build_router(state: Arc<AppState>, socket_layer: Option<SocketIoLayer>) -> Router {
    let mut app = Router::new()
        // Health
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        // Rooms
        .route("/chat-rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route(
            "/chat-rooms/:id",
            get(rooms::show_room).put(rooms::update_room).delete(rooms::delete_room),
        )
        .route("/chat-rooms/:id/leave", post(rooms::leave_room))
        .route("/chat-rooms/:id/participants", post(rooms::add_participant))
        .route(
            "/chat-rooms/:id/participants/:user",
            axum::routing::delete(rooms::remove_participant),
        )
        .route(
            "/chat-rooms/:id/participants/:user/mute",
            post(rooms::mute_participant).delete(rooms::unmute_participant),
        )
        // Messages
        .route(
            "/chat-rooms/:id/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route("/chat-rooms/:id/messages/search", get(messages::search_messages))
        .route(
            "/chat-rooms/:id/messages/:mid",
            put(messages::edit_message).delete(messages::delete_message),
        )
        .route("/chat-rooms/:id/messages/:mid/forward", post(messages::forward_message))
        .route(
            "/chat-rooms/:id/messages/:mid/reactions",
            post(messages::add_reaction).delete(messages::remove_reaction),
        )
        // Moderation
        .route("/messages/:mid/report", post(moderation::report_message))
        .route("/moderation/my-reports", get(moderation::my_reports))
        .route("/moderation/reports", get(moderation::list_reports))
        .route("/moderation/reports/:id", put(moderation::review_report))
        .route("/moderation/block-ip", post(moderation::block_ip))
        .route("/moderation/unblock-ip", post(moderation::unblock_ip))
        .route("/moderation/blocked-ips", get(moderation::list_blocked_ips))
        .route("/moderation/audit-logs", get(moderation::list_audit_logs))
        // Presence
        .route("/users/me/status", put(users::update_status))
        .route_layer(from_fn_with_state(state.clone(), identity::register_caller))
        .route_layer(from_fn(metrics_middleware));

    if let Some(layer) = socket_layer {
        app = app.layer(layer);
    }

    app.layer(from_fn_with_state(state.clone(), gate::ip_gate))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
