//! Key and channel naming conventions shared by every component that touches the presence store.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

const ROOM_PREFIX: &str = "room:project:";
const CONNECTION_KEY_PREFIX: &str = "sid:";
const CONNECTION_CHANNEL_PREFIX: &str = "conn:";
const USER_SUBJECT_PREFIX: &str = "sub:user:";

/// Delivery mechanism a subject can be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelTag {
    /// Subject has an active event-stream subscriber.
    Sse,
    /// Subject has a registered push-capable device.
    WebPush,
}

impl ChannelTag {
    pub fn prefix(&self) -> &'static str {
        match self {
            ChannelTag::Sse => "sse:",
            ChannelTag::WebPush => "webpush:",
        }
    }

    fn other(&self) -> ChannelTag {
        match self {
            ChannelTag::Sse => ChannelTag::WebPush,
            ChannelTag::WebPush => ChannelTag::Sse,
        }
    }

    /// Tag `subject`. Already-tagged subjects are returned unchanged; a subject carrying the other
    /// tag is rejected.
    pub fn apply(&self, subject: &str) -> AppResult<String> {
        if subject.contains(self.other().prefix()) {
            return Err(AppError::InvalidChannel(format!(
                "'{}' cannot be tagged {}",
                subject,
                self.prefix().trim_end_matches(':')
            )));
        }
        if subject.contains(self.prefix()) {
            return Ok(subject.to_string());
        }
        Ok(format!("{}{}", self.prefix(), subject))
    }
}

/// Room name for a project: `room:project:<id>`. Used as a store key, never stored durably.
pub fn room_name(project_id: i64) -> String {
    format!("{}{}", ROOM_PREFIX, project_id)
}

/// Canonical per-user notification subject: `sub:user:<id>`.
pub fn user_subject(user_id: i64) -> String {
    format!("{}{}", USER_SUBJECT_PREFIX, user_id)
}

/// Store key holding the connection record for `sid`.
pub fn connection_key(sid: &str) -> String {
    format!("{}{}", CONNECTION_KEY_PREFIX, sid)
}

/// Pub/sub channel for frames addressed to one connection.
pub fn connection_channel(sid: &str) -> String {
    format!("{}{}", CONNECTION_CHANNEL_PREFIX, sid)
}

/// `sse:sub:user:<id>`
pub fn user_stream_channel(user_id: i64) -> AppResult<String> {
    ChannelTag::Sse.apply(&user_subject(user_id))
}

/// `webpush:sub:user:<id>`
pub fn user_push_key(user_id: i64) -> AppResult<String> {
    ChannelTag::WebPush.apply(&user_subject(user_id))
}

/// Glob matching every tag (any prefix) of a user's subject.
pub fn user_tags_pattern(user_id: i64) -> String {
    format!("*:{}", user_subject(user_id))
}

/// Key patterns owned by this service, cleared on warm start.
pub const PRESENCE_KEY_PATTERNS: &[&str] = &["sid:*", "room:project:*", "sse:*", "webpush:*"];
