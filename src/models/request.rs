//! Validated socket requests. Each operation has one `parse` that yields either the request or
//! every field error found.

use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

use crate::error::FieldErrors;

/// `join_project` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinProjectRequest {
    pub project_id: i64,
}

impl JoinProjectRequest {
    pub fn parse(data: &Value) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::new();
        let project_id = required_id(data, "project_id", &mut errors);
        match project_id {
            Some(project_id) if errors.is_empty() => Ok(Self { project_id }),
            _ => Err(errors),
        }
    }
}

/// Attachment carried inline as base64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub file_base64: String,
}

/// `send_message` payload. The sender is never taken from the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessageRequest {
    pub project_id: i64,
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
    /// `None` (or `0` on the wire) for a public message.
    pub receiver_id: Option<i64>,
}

impl SendMessageRequest {
    pub fn parse(data: &Value, allowed_extensions: &[String]) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::new();
        let project_id = required_id(data, "project_id", &mut errors);

        let content = non_empty_str(data, "content");
        let file_name = non_empty_str(data, "file_name");
        let file_base64 = non_empty_str(data, "file_base64");

        if content.is_none() && !(file_name.is_some() && file_base64.is_some()) {
            errors.insert("content", "'content' is required.");
        }

        let receiver_id = match data.get("receiver_id") {
            None | Some(Value::Null) => None,
            Some(v) => match v.as_i64() {
                Some(0) => None,
                Some(id) => Some(id),
                None => {
                    errors.insert("receiver_id", "'receiver_id' is number.");
                    None
                }
            },
        };

        match (&file_name, &file_base64) {
            (None, Some(_)) => errors.insert("file_name", "'file_name' is required."),
            (Some(_), None) => errors.insert("file_name", "'file_base64' is required."),
            _ => {}
        }
        if let Some(name) = &file_name {
            if !extension_allowed(name, allowed_extensions) {
                errors.insert(
                    "file_name",
                    format!(
                        "'file_name' must be allowed extensions in [{}]",
                        allowed_extensions.join(", ")
                    ),
                );
            }
        }

        let attachment = match (file_name, file_base64) {
            (Some(file_name), Some(file_base64)) => Some(Attachment {
                file_name,
                file_base64,
            }),
            _ => None,
        };

        match project_id {
            Some(project_id) if errors.is_empty() => Ok(Self {
                project_id,
                content,
                attachment,
                receiver_id,
            }),
            _ => Err(errors),
        }
    }

    pub fn is_private(&self) -> bool {
        self.receiver_id.is_some()
    }
}

/// Body of `POST /subscription`: the browser's `PushSubscription.toJSON()`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PushSubscriptionRequest {
    #[validate(url(message = "'endpoint' must be a URL."))]
    pub endpoint: String,
    #[serde(default, rename = "expirationTime")]
    pub expiration_time: Option<i64>,
    #[validate(nested)]
    pub keys: PushKeys,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PushKeys {
    #[validate(length(min = 1, message = "'p256dh' is required."))]
    pub p256dh: String,
    #[validate(length(min = 1, message = "'auth' is required."))]
    pub auth: String,
}

/// A positive integer id; `0`, absent and `null` count as missing.
fn required_id(data: &Value, field: &str, errors: &mut FieldErrors) -> Option<i64> {
    match data.get(field) {
        None | Some(Value::Null) => {
            errors.insert(field, format!("'{}' is required.", field));
            None
        }
        Some(v) => match v.as_i64() {
            Some(0) => {
                errors.insert(field, format!("'{}' is required.", field));
                None
            }
            Some(id) => Some(id),
            None => {
                errors.insert(field, format!("'{}' is number.", field));
                None
            }
        },
    }
}

fn non_empty_str(data: &Value, field: &str) -> Option<String> {
    data.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn extension_allowed(file_name: &str, allowed: &[String]) -> bool {
    match file_name.rsplit_once('.') {
        Some((_, ext)) => allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)),
        None => false,
    }
}
