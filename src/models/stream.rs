//! Server-sent event frames.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_SSE_RETRY_MS;

fn default_retry() -> Option<u64> {
    Some(DEFAULT_SSE_RETRY_MS)
}

/// Unit pushed down an event stream. Also the payload published on a user's stream channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamedEvent {
    pub data: serde_json::Value,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default = "default_retry", skip_serializing_if = "Option::is_none")]
    pub retry: Option<u64>,
}

impl StreamedEvent {
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            event_type: None,
            id: None,
            retry: default_retry(),
        }
    }

    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_retry(mut self, retry: Option<u64>) -> Self {
        self.retry = retry;
        self
    }
}

/// Text frame: optional `event:`, one `data:` line per line of the JSON payload, optional `id:` and
/// `retry:`, then a blank line. Empty type/id and a zero retry are omitted. The payload is
/// compact JSON with no space after `,` or `:`; clients must parse it rather than match text.
impl fmt::Display for StreamedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = serde_json::to_string(&self.data).map_err(|_| fmt::Error)?;
        let mut lines: Vec<String> = Vec::new();
        if let Some(t) = self.event_type.as_deref().filter(|t| !t.is_empty()) {
            lines.push(format!("event:{}", t));
        }
        lines.extend(data.lines().map(|line| format!("data:{}", line)));
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            lines.push(format!("id:{}", id));
        }
        if let Some(retry) = self.retry.filter(|r| *r != 0) {
            lines.push(format!("retry:{}", retry));
        }
        write!(f, "{}\n\n", lines.join("\n"))
    }
}
