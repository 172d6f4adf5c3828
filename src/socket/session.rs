//! Per-connection protocol state: join, leave, send and disconnect for one socket.

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::handlers::http::AppState;
use crate::models::channel::connection_channel;
use crate::models::event::{
    ClientMessage, RoomBroadcast, ServerEvent, EVENT_CONNECTION_ESTABLISHED, EVENT_OFFLINE,
    EVENT_ONLINE, EVENT_PONG, EVENT_RECEIVE_MESSAGE,
};
use crate::models::presence::{generate_socket_id, JoinOutcome, LeaveOutcome};
use crate::models::request::{JoinProjectRequest, SendMessageRequest};
use crate::services::{PostedMessage, PresenceService};

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    InRoom(String),
    Terminated,
}

struct RoomForwarder {
    room: String,
    task: JoinHandle<()>,
}

/// One authenticated socket. Frames for the client are written to the outbox returned by
/// [`Session::open`]; the transport drains it.
pub struct Session {
    state: AppState,
    sid: String,
    user_id: i64,
    status: ConnectionState,
    outbox: mpsc::UnboundedSender<String>,
    direct: Option<JoinHandle<()>>,
    room: Option<RoomForwarder>,
}

impl Session {
    /// Resolve the token and open a session. A bad token opens nothing.
    pub async fn connect(
        state: AppState,
        token: &str,
    ) -> AppResult<(Session, mpsc::UnboundedReceiver<String>)> {
        let user_id = state.jwt_secret().resolve_identity(token)?;
        Self::open(state, user_id).await
    }

    /// Register a fresh connection for an already authenticated user and queue
    /// `connection_established`.
    #[instrument(skip(state))]
    pub async fn open(
        state: AppState,
        user_id: i64,
    ) -> AppResult<(Session, mpsc::UnboundedReceiver<String>)> {
        let sid = generate_socket_id();
        let (outbox, frames) = mpsc::unbounded_channel();

        let direct_channel = connection_channel(&sid);
        let rx = state.channel_service.subscribe(&direct_channel).await?;
        let direct = tokio::spawn(forward_direct(rx, outbox.clone()));

        if let Err(e) = state.presence_service().register_connection(&sid, user_id).await {
            direct.abort();
            state.channel_service.release(&direct_channel).await;
            return Err(e);
        }

        let session = Session {
            state,
            sid,
            user_id,
            status: ConnectionState::Connected,
            outbox,
            direct: Some(direct),
            room: None,
        };
        session.send_frame(&ServerEvent::new(
            EVENT_CONNECTION_ESTABLISHED,
            json!({ "sid": session.sid }),
        ));
        info!(sid = %session.sid, user_id, "socket connected");
        Ok((session, frames))
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn status(&self) -> &ConnectionState {
        &self.status
    }

    /// Dispatch one client frame. Returns the reply for the client: an `ack` when the frame
    /// carried an ack id, an `error` whenever the operation failed, `pong` for pings.
    pub async fn handle(&mut self, message: ClientMessage) -> Option<ServerEvent> {
        let ack = message.ack();
        let result = match message {
            ClientMessage::JoinProject { data, .. } => self
                .join_project(&data)
                .await
                .map(|outcome| json!(outcome.online)),
            ClientMessage::LeaveProject { .. } => self
                .leave_project()
                .await
                .map(|left| json!(left.map(|l| json!({ "room": l.room })))),
            ClientMessage::SendMessage { data, .. } => self.send_message(&data).await,
            ClientMessage::Ping => return Some(ServerEvent::new(EVENT_PONG, json!({}))),
        };
        match result {
            Ok(data) => ack.map(|_| ServerEvent::reply(ack, data)),
            Err(e) => {
                debug!(sid = %self.sid, error = %e, "socket operation rejected");
                Some(ServerEvent::error(ack, e.payload()))
            }
        }
    }

    /// Join the project's room and announce the joiner to the others. Validation happens
    /// before any state is touched. Joining another room first leaves the current one.
    #[instrument(skip(self, data), fields(sid = %self.sid))]
    pub async fn join_project(&mut self, data: &Value) -> AppResult<JoinOutcome> {
        self.ensure_open()?;
        let request = JoinProjectRequest::parse(data).map_err(AppError::Validation)?;
        let room = PresenceService::derive_room_name(request.project_id);

        if self.status == ConnectionState::InRoom(room.clone()) {
            let online = self.state.presence_service().list_online_members(&room).await?;
            return Ok(JoinOutcome {
                room,
                user_id: self.user_id,
                online,
            });
        }
        if matches!(self.status, ConnectionState::InRoom(_)) {
            self.leave_project().await?;
        }

        let rx = self.state.channel_service.subscribe(&room).await?;
        let outcome = match self.state.presence_service().join(&self.sid, &room).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.state.channel_service.release(&room).await;
                return Err(e);
            }
        };
        let task = tokio::spawn(forward_room(rx, self.sid.clone(), self.outbox.clone()));
        self.room = Some(RoomForwarder {
            room: room.clone(),
            task,
        });
        self.status = ConnectionState::InRoom(room.clone());

        self.state
            .channel_service
            .broadcast_room(
                &room,
                ServerEvent::new(EVENT_ONLINE, json!({ "user_id": outcome.user_id })),
                Some(&self.sid),
            )
            .await?;
        Ok(outcome)
    }

    /// Leave the current room and announce it. `None` when not in a room.
    #[instrument(skip(self), fields(sid = %self.sid))]
    pub async fn leave_project(&mut self) -> AppResult<Option<LeaveOutcome>> {
        self.ensure_open()?;
        let left = self.state.presence_service().leave(&self.sid).await?;
        self.drop_room_forwarder().await;
        self.status = ConnectionState::Connected;

        if let Some(left) = &left {
            self.state
                .channel_service
                .broadcast_room(
                    &left.room,
                    ServerEvent::new(EVENT_OFFLINE, json!({ "user_id": left.user_id })),
                    Some(&self.sid),
                )
                .await?;
        }
        Ok(left)
    }

    /// Persist a message and deliver it. Returns the message view for the sender's ack.
    /// Once persisted, a delivery failure is reported on the outbox and the view is still returned.
    #[instrument(skip(self, data), fields(sid = %self.sid))]
    pub async fn send_message(&mut self, data: &Value) -> AppResult<Value> {
        self.ensure_open()?;
        let request = SendMessageRequest::parse(data, &self.state.allowed_extensions)
            .map_err(AppError::Validation)?;
        let sender_id = self.state.presence_service().user_of(&self.sid).await?;
        let posted = self.state.message_service.post(sender_id, &request).await?;
        let view = posted.view();

        if let Err(e) = self.deliver(&posted, &view).await {
            warn!(
                sid = %self.sid,
                message_id = posted.message.id,
                error = %e,
                "message saved but delivery failed"
            );
            self.send_frame(&ServerEvent::error(None, e.payload()));
        }
        Ok(view)
    }

    async fn deliver(&self, posted: &PostedMessage, view: &Value) -> AppResult<()> {
        let room = PresenceService::derive_room_name(posted.project.id);
        let event = ServerEvent::new(EVENT_RECEIVE_MESSAGE, view.clone());
        let envelope = posted.envelope();

        match posted.message.receiver_id {
            None => {
                self.state
                    .channel_service
                    .broadcast_room(&room, event, Some(&self.sid))
                    .await?;
                let members = self.state.message_service.project_members(posted.project.id).await?;
                let mut exclude = self.state.presence_service().online_user_ids(&room).await?;
                exclude.push(posted.sender.id);
                self.state
                    .notification_router
                    .notify_members(&members, &exclude, &envelope)
                    .await?;
            }
            Some(receiver_id) => {
                let target = self
                    .state
                    .presence_service()
                    .find_connection_in_room(receiver_id, &room)
                    .await?;
                match target {
                    Some(target) => {
                        self.state.channel_service.send_to_connection(&target, &event).await?;
                    }
                    None => {
                        let delivery = self
                            .state
                            .notification_router
                            .route(receiver_id, &envelope)
                            .await?;
                        debug!(receiver_id, ?delivery, "private message routed offline");
                    }
                }
            }
        }
        Ok(())
    }

    /// Leave any room, drop the connection record and stop forwarding. Idempotent.
    #[instrument(skip(self), fields(sid = %self.sid))]
    pub async fn disconnect(&mut self) {
        if self.status == ConnectionState::Terminated {
            return;
        }
        if matches!(self.status, ConnectionState::InRoom(_)) {
            if let Err(e) = self.leave_project().await {
                warn!(sid = %self.sid, error = %e, "leave on disconnect failed");
            }
        }
        if let Err(e) = self.state.presence_service().unregister_connection(&self.sid).await {
            warn!(sid = %self.sid, error = %e, "could not unregister connection");
        }
        self.drop_room_forwarder().await;
        if let Some(direct) = self.direct.take() {
            direct.abort();
            self.state
                .channel_service
                .release(&connection_channel(&self.sid))
                .await;
        }
        self.status = ConnectionState::Terminated;
        info!(sid = %self.sid, user_id = self.user_id, "socket disconnected");
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.status == ConnectionState::Terminated {
            return Err(AppError::Auth(format!("connection {} is closed", self.sid)));
        }
        Ok(())
    }

    async fn drop_room_forwarder(&mut self) {
        if let Some(forwarder) = self.room.take() {
            forwarder.task.abort();
            self.state.channel_service.release(&forwarder.room).await;
        }
    }

    /// Queue a frame behind everything already in the outbox. `false` once the transport is gone.
    pub fn send_frame(&self, event: &ServerEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(frame) => {
                let sent = self.outbox.send(frame).is_ok();
                if !sent {
                    debug!(sid = %self.sid, "outbox closed; frame dropped");
                }
                sent
            }
            Err(e) => {
                warn!(sid = %self.sid, error = %e, "could not encode frame");
                true
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let mut channels = Vec::new();
        if let Some(forwarder) = self.room.take() {
            forwarder.task.abort();
            channels.push(forwarder.room);
        }
        if let Some(direct) = self.direct.take() {
            direct.abort();
            channels.push(connection_channel(&self.sid));
        }
        if channels.is_empty() {
            return;
        }
        let service = self.state.channel_service.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for channel in channels {
                        service.release(&channel).await;
                    }
                });
            }
            Err(_) => warn!(sid = %self.sid, "no runtime to release socket channels"),
        }
    }
}

async fn forward_direct(mut rx: broadcast::Receiver<String>, outbox: mpsc::UnboundedSender<String>) {
    loop {
        match rx.recv().await {
            Ok(frame) => {
                if outbox.send(frame).is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "direct channel lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn forward_room(
    mut rx: broadcast::Receiver<String>,
    sid: String,
    outbox: mpsc::UnboundedSender<String>,
) {
    loop {
        let payload = match rx.recv().await {
            Ok(payload) => payload,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(sid = %sid, skipped, "room channel lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let frame: RoomBroadcast = match serde_json::from_str(&payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(sid = %sid, error = %e, "dropping malformed room frame");
                continue;
            }
        };
        if frame.except.as_deref() == Some(sid.as_str()) {
            continue;
        }
        match serde_json::to_string(&frame.event) {
            Ok(event) => {
                if outbox.send(event).is_err() {
                    break;
                }
            }
            Err(e) => warn!(sid = %sid, error = %e, "could not encode room event"),
        }
    }
}
