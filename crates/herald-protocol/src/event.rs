use herald_core::error::{HeraldError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Longest id or event type accepted from producers.
pub const MAX_FIELD_LEN: usize = 255;

/// Event types producers may publish over HTTP. `connected` and
/// `keep-alive` are reserved for the server itself.
pub const PUBLISH_EVENT_TYPES: &[&str] = &[
    "message",
    "notification",
    "update",
    "alert",
    "status",
    "data",
    "event",
    "error",
    "warning",
    "info",
    "heartbeat",
    "custom",
];

/// One server-sent event.
///
/// Wire (each block ends with a blank line):
/// ```text
/// id: 42
/// event: update
/// retry: 3000
/// data: first line
/// data: second line
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "event", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub data: String,
    #[serde(rename = "retry", default, skip_serializing_if = "Option::is_none")]
    pub retry_millis: Option<u64>,
}

impl Event {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_retry(mut self, millis: u64) -> Self {
        self.retry_millis = Some(millis);
        self
    }

    /// Id usable as a replay cursor; empty ids count as absent.
    pub fn cursor(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Render the event as one wire block, blank-line terminated.
    ///
    /// `id`/`event` are omitted when absent or empty, `retry` when absent or
    /// zero. Every line of `data` becomes its own `data:` line; a CR before a
    /// line break is dropped so `\r\n` payloads do not leak stray CRs.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + 32);
        if let Some(id) = self.cursor() {
            let _ = writeln!(out, "id: {id}");
        }
        if let Some(ty) = self.event_type.as_deref().filter(|t| !t.is_empty()) {
            let _ = writeln!(out, "event: {ty}");
        }
        if let Some(retry) = self.retry_millis.filter(|r| *r > 0) {
            let _ = writeln!(out, "retry: {retry}");
        }
        for line in self.data.split('\n') {
            let _ = writeln!(out, "data: {}", line.strip_suffix('\r').unwrap_or(line));
        }
        out.push('\n');
        out
    }

    /// Reject ids and event types that would corrupt the stream framing.
    pub fn validate(&self) -> Result<()> {
        check_field("id", self.id.as_deref())?;
        check_field("event type", self.event_type.as_deref())
    }
}

fn check_field(name: &str, value: Option<&str>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if value.len() > MAX_FIELD_LEN {
        return Err(HeraldError::Protocol(format!(
            "{name} too long (max {MAX_FIELD_LEN} characters)"
        )));
    }
    if value.contains(['\n', '\r']) {
        return Err(HeraldError::Protocol(format!("{name} cannot contain newlines")));
    }
    Ok(())
}
