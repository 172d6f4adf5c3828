//! HTTP handlers: event stream, push subscriptions, operator API and health.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use crate::auth::JwtSecret;
use crate::config::Config;
use crate::db::ChatStore;
use crate::error::{AppError, FieldErrors};
use crate::middleware::auth::{AppKey, AuthUser};
use crate::models::channel::room_name;
use crate::models::notification::{Envelope, NotificationKind};
use crate::models::request::PushSubscriptionRequest;
use crate::repositories::PresenceStore;
use crate::services::{
    ChannelService, MessageService, NotificationRouter, PresenceService, PushTransport,
    StreamService, SubscriptionService,
};

/// Settings the handlers need besides the services.
#[derive(Debug, Clone)]
pub struct StateOptions {
    pub app_key: String,
    pub allowed_extensions: Vec<String>,
    pub sse_retry_ms: u64,
}

impl From<&Config> for StateOptions {
    fn from(config: &Config) -> Self {
        Self {
            app_key: config.app_key.clone(),
            allowed_extensions: config.allowed_extensions.clone(),
            sse_retry_ms: config.sse_retry_ms,
        }
    }
}

/// Shared application state for HTTP and WS handlers.
#[derive(Clone)]
pub struct AppState {
    pub app_key: String,
    pub allowed_extensions: Arc<Vec<String>>,
    pub channel_service: ChannelService,
    pub presence_service: PresenceService,
    pub message_service: MessageService,
    pub notification_router: NotificationRouter,
    pub stream_service: StreamService,
    pub subscription_service: SubscriptionService,
    pub jwt_secret: JwtSecret,
}

impl AppState {
    /// Wire every service over the injected store, durable store and push transport.
    pub fn new(
        store: Arc<dyn PresenceStore>,
        chat: Arc<dyn ChatStore>,
        push: Arc<dyn PushTransport>,
        jwt_secret: JwtSecret,
        options: StateOptions,
    ) -> Self {
        Self {
            app_key: options.app_key,
            allowed_extensions: Arc::new(options.allowed_extensions),
            channel_service: ChannelService::new(store.clone()),
            presence_service: PresenceService::new(store.clone()),
            message_service: MessageService::new(chat.clone()),
            notification_router: NotificationRouter::new(store.clone(), push, options.sse_retry_ms),
            stream_service: StreamService::new(store.clone()),
            subscription_service: SubscriptionService::new(chat, store),
            jwt_secret,
        }
    }

    pub fn jwt_secret(&self) -> &JwtSecret {
        &self.jwt_secret
    }
    pub fn presence_service(&self) -> &PresenceService {
        &self.presence_service
    }
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub token: Option<String>,
}

/// GET /stream?token=...: open the caller's event stream.
pub async fn open_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, AppError> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Auth("Provide a valid auth token.".to_string()))?;
    let user_id = state.jwt_secret().resolve_identity(&token)?;
    let events = state.stream_service.stream(user_id).await?;

    let body = Body::from_stream(events.map(|ev| Ok::<_, Infallible>(ev.to_string())));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("stream response: {}", e)))
}

/// DELETE /stream: tear down the caller's stream.
pub async fn close_stream(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<StatusCode, AppError> {
    state.stream_service.disconnect(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /subscription: store the caller's push subscription.
pub async fn subscribe_push(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let request: PushSubscriptionRequest = serde_json::from_value(body.clone())?;
    request
        .validate()
        .map_err(|e| AppError::Validation(FieldErrors::from(e)))?;
    state.subscription_service.subscribe(user_id, &body).await?;
    Ok(Json(json!({ "message": "Stored the client's key." })))
}

/// DELETE /subscription: forget the caller's push subscription.
pub async fn unsubscribe_push(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    state.subscription_service.unsubscribe(user_id).await?;
    Ok(Json(json!({ "message": "Unsubscribed the client's key." })))
}

/// Body of `POST /api/notify`.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyRequest {
    pub user_ids: Vec<i64>,
    #[serde(default)]
    pub exclude: Vec<i64>,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// POST /api/notify: fan a notification out to members, minus exclusions.
pub async fn notify(
    State(state): State<AppState>,
    _key: AppKey,
    Json(body): Json<NotifyRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if body.user_ids.is_empty() {
        return Err(AppError::Validation(FieldErrors::single(
            "user_ids",
            "'user_ids' is required.",
        )));
    }
    let envelope = Envelope::new(body.kind, body.message, body.data);
    let outcomes = state
        .notification_router
        .notify_members(&body.user_ids, &body.exclude, &envelope)
        .await?;
    let deliveries: serde_json::Map<String, serde_json::Value> = outcomes
        .into_iter()
        .map(|(id, delivery)| (id.to_string(), json!(delivery)))
        .collect();
    Ok(Json(json!({ "ok": true, "deliveries": deliveries })))
}

/// GET /api/rooms/:project_id/online: online member snapshot.
pub async fn room_online(
    State(state): State<AppState>,
    _key: AppKey,
    Path(project_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let room = room_name(project_id);
    let online = state.presence_service().list_online_members(&room).await?;
    Ok(Json(json!({ "room": room, "online": online })))
}

/// DELETE /api/users/:id/channels: drop every delivery channel of a user (archived accounts).
pub async fn purge_user_channels(
    State(state): State<AppState>,
    _key: AppKey,
    Path(user_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.stream_service.disconnect(user_id).await?;
    let removed = state.subscription_service.purge_user(user_id).await?;
    info!(user_id, removed, "user channels purged by operator");
    Ok(Json(json!({ "ok": true, "removed": removed })))
}

/// GET /health: liveness probe.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "chatrelay" })),
    )
}

