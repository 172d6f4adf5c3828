//! Connection records and online member snapshots.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ephemeral record stored under `sid:<sid>` and, once joined, as a member of the room set.
///
/// Field order is alphabetical so the serialized form is byte-stable: a leave removes exactly the
/// string the join added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub user_id: i64,
}

impl ConnectionRecord {
    /// Record written on connect: identity only.
    pub fn identity(user_id: i64) -> Self {
        Self {
            room: None,
            sid: None,
            user_id,
        }
    }

    /// Record written on join.
    pub fn in_room(user_id: i64, sid: &str, room: &str) -> Self {
        Self {
            room: Some(room.to_string()),
            sid: Some(sid.to_string()),
            user_id,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Online member entry returned to joiners and operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineMember {
    pub user_id: i64,
}

/// Result of a successful join.
#[derive(Debug, Clone, Serialize)]
pub struct JoinOutcome {
    pub room: String,
    pub user_id: i64,
    pub online: Vec<OnlineMember>,
}

/// Result of a leave that actually left a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub room: String,
    pub user_id: i64,
}

/// Generate a unique socket/connection id.
pub fn generate_socket_id() -> String {
    format!("{}.{}", std::process::id(), Uuid::new_v4().as_simple())
}
