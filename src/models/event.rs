//! Socket frames exchanged with clients and relayed between instances.

use serde::{Deserialize, Serialize};

pub const EVENT_CONNECTION_ESTABLISHED: &str = "connection_established";
pub const EVENT_ONLINE: &str = "online";
pub const EVENT_OFFLINE: &str = "offline";
pub const EVENT_RECEIVE_MESSAGE: &str = "receive_message";
pub const EVENT_ACK: &str = "ack";
pub const EVENT_ERROR: &str = "error";
pub const EVENT_PONG: &str = "pong";

/// Frame sent over the socket to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    pub event: String,
    pub data: serde_json::Value,
    /// Echo of the client's `ack` id for replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

impl ServerEvent {
    pub fn new(event: &str, data: serde_json::Value) -> Self {
        Self {
            event: event.to_string(),
            data,
            ack: None,
        }
    }

    pub fn reply(ack: Option<u64>, data: serde_json::Value) -> Self {
        Self {
            event: EVENT_ACK.to_string(),
            data,
            ack,
        }
    }

    pub fn error(ack: Option<u64>, data: serde_json::Value) -> Self {
        Self {
            event: EVENT_ERROR.to_string(),
            data,
            ack,
        }
    }
}

/// Frame published on a room channel; every occupant except `except` forwards `event` to its socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomBroadcast {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub except: Option<String>,
    pub event: ServerEvent,
}

/// Client-invocable socket operations. `disconnect` is implicit when the transport closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinProject {
        #[serde(default)]
        data: serde_json::Value,
        #[serde(default)]
        ack: Option<u64>,
    },
    LeaveProject {
        #[serde(default)]
        ack: Option<u64>,
    },
    SendMessage {
        #[serde(default)]
        data: serde_json::Value,
        #[serde(default)]
        ack: Option<u64>,
    },
    Ping,
}

impl ClientMessage {
    pub fn ack(&self) -> Option<u64> {
        match self {
            ClientMessage::JoinProject { ack, .. }
            | ClientMessage::LeaveProject { ack }
            | ClientMessage::SendMessage { ack, .. } => *ack,
            ClientMessage::Ping => None,
        }
    }
}
