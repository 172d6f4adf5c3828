//! Notification envelopes routed to offline members.

use serde::{Deserialize, Serialize};

/// Fixed taxonomy of notification types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    NewMessage,
    AddedToProject,
    ProjectEdited,
    ProjectDeleted,
    RoleChanged,
    AccountArchived,
}

impl NotificationKind {
    /// Event type carried by the stream frame or push payload.
    pub fn action(&self) -> &'static str {
        match self {
            NotificationKind::NewMessage => "action-message",
            NotificationKind::AddedToProject
            | NotificationKind::ProjectEdited
            | NotificationKind::ProjectDeleted => "action-project",
            NotificationKind::RoleChanged | NotificationKind::AccountArchived => "action-user",
        }
    }
}

/// `{type, message, data}` payload delivered through the stream or push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(kind: NotificationKind, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind,
            message: message.into(),
            data,
        }
    }

    /// Offline notice for a new message in `project_title`.
    pub fn new_message(sender_username: &str, project_title: &str, private: bool) -> Self {
        let what = if private {
            "you a new private message"
        } else {
            "a new message"
        };
        Self::new(
            NotificationKind::NewMessage,
            format!("'@{}' sent {}.", sender_username, what),
            serde_json::json!({ "project_title": project_title }),
        )
    }
}

/// Which channel, if any, a routed notification went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    Stream,
    Push,
    /// Push-tagged, but the push transport reported a failure.
    PushFailed,
    /// Neither tag present.
    Dropped,
}
