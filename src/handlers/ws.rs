//! WebSocket handler: token check before upgrade, then one session per socket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::handlers::http::AppState;
use crate::middleware::auth::bearer_token;
use crate::models::event::{ClientMessage, ServerEvent};
use crate::socket::Session;

const OUTBOX_DRAIN: Duration = Duration::from_secs(1);

/// Upgrade HTTP to WebSocket. The token comes from `?token=` or the bearer header and is
/// resolved before upgrading, so a bad token never opens a connection.
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let token = socket_token(&params, &headers)?;
    let user_id = state.jwt_secret().resolve_identity(&token)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(state, socket, user_id)))
}

/// Query parameter first, then the `Authorization` header.
pub(crate) fn socket_token(
    params: &HashMap<String, String>,
    headers: &HeaderMap,
) -> Result<String, AppError> {
    if let Some(token) = params.get("token").filter(|t| !t.is_empty()) {
        return Ok(token.clone());
    }
    bearer_token(headers).map(str::to_string)
}

async fn handle_socket(state: AppState, socket: WebSocket, user_id: i64) {
    let (mut session, mut frames) = match Session::open(state, user_id).await {
        Ok(opened) => opened,
        Err(e) => {
            warn!(user_id, error = %e, "could not open socket session");
            return;
        }
    };
    let sid = session.sid().to_string();

    let (mut sender, mut receiver) = socket.split();
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                let reply = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => session.handle(client_msg).await,
                    Err(e) => {
                        debug!(sid = %sid, error = %e, "unparseable client frame");
                        Some(ServerEvent::error(None, AppError::Serialization(e).payload()))
                    }
                };
                if let Some(reply) = reply {
                    if !session.send_frame(&reply) {
                        break;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Dropping the session closes the outbox; the writer flushes what is queued and then stops.
    session.disconnect().await;
    drop(session);
    if timeout(OUTBOX_DRAIN, &mut send_task).await.is_err() {
        debug!(sid = %sid, "outbox drain timed out");
        send_task.abort();
    }
    info!(sid = %sid, user_id, "ws closed");
}
