//! Project-chat presence and delivery core.
//!
//! Tracks which connections are in which project room, relays chat messages to live
//! members over WebSocket, and routes notifications for absent members to an event
//! stream or a push subscription. Presence state lives in Redis so several instances
//! share one view.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod services;
pub mod socket;

pub use config::Config;
pub use error::AppError;
pub use handlers::http::{AppState, StateOptions};
pub use services::channel::ChannelService;
pub use services::presence::PresenceService;

use axum::routing::{delete, get, post};
use handlers::http;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the router (ws, stream, subscription, operator API, health). Used by main and by integration tests.
pub fn create_app(state: AppState) -> axum::Router {
    let api_routes = axum::Router::new()
        .route("/notify", post(http::notify))
        .route("/rooms/:project_id/online", get(http::room_online))
        .route("/users/:id/channels", delete(http::purge_user_channels));

    axum::Router::new()
        .route("/ws", get(handlers::ws_handler))
        .route("/stream", get(http::open_stream).delete(http::close_stream))
        .route(
            "/subscription",
            post(http::subscribe_push).delete(http::unsubscribe_push),
        )
        .route("/health", get(http::health))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
