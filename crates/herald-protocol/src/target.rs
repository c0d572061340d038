use herald_core::error::{HeraldError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Who receives a published event.
///
/// Text form: `all`, `topic:<name>`, `connection:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Target {
    All,
    Topic(String),
    Connection(String),
}

impl Target {
    /// Pick a target from loose producer inputs.
    ///
    /// Priority: explicit target string > connection id > topic > `all`.
    pub fn resolve(
        target: Option<&str>,
        connection_id: Option<&str>,
        topic: Option<&str>,
    ) -> Result<Self> {
        if let Some(raw) = non_empty(target) {
            return raw.parse();
        }
        if let Some(id) = non_empty(connection_id) {
            return Ok(Target::Connection(id.to_string()));
        }
        if let Some(topic) = non_empty(topic) {
            return Ok(Target::Topic(topic.to_string()));
        }
        Ok(Target::All)
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|v| !v.trim().is_empty())
}

impl FromStr for Target {
    type Err = HeraldError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || s == "all" {
            return Ok(Target::All);
        }
        if let Some(id) = s.strip_prefix("connection:") {
            if id.is_empty() {
                return Err(HeraldError::Protocol("connection ID cannot be empty".into()));
            }
            return Ok(Target::Connection(id.to_string()));
        }
        if let Some(topic) = s.strip_prefix("topic:") {
            if topic.is_empty() {
                return Err(HeraldError::Protocol("topic name cannot be empty".into()));
            }
            return Ok(Target::Topic(topic.to_string()));
        }
        Err(HeraldError::Protocol(format!(
            "invalid target '{s}'. Use 'all', 'connection:ID', or 'topic:NAME'"
        )))
    }
}

impl TryFrom<String> for Target {
    type Error = HeraldError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Target> for String {
    fn from(t: Target) -> Self {
        t.to_string()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => f.write_str("all"),
            Target::Topic(t) => write!(f, "topic:{t}"),
            Target::Connection(id) => write!(f, "connection:{id}"),
        }
    }
}

/// How a structured payload becomes the event's `data` text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// Always JSON. Strings that already hold valid JSON pass through.
    Json,
    /// Plain text rendering.
    String,
    /// Strings as-is, objects/arrays as JSON, scalars as text.
    #[default]
    Auto,
}

impl DataFormat {
    pub fn render(self, data: &Value) -> Result<String> {
        match self {
            DataFormat::Json => render_json(data),
            DataFormat::String => Ok(render_text(data)),
            DataFormat::Auto => match data {
                Value::Null => Ok("null".to_string()),
                Value::String(s) => Ok(s.clone()),
                Value::Object(_) | Value::Array(_) => render_json(data),
                other => Ok(other.to_string()),
            },
        }
    }
}

impl FromStr for DataFormat {
    type Err = HeraldError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(DataFormat::Json),
            "string" => Ok(DataFormat::String),
            "auto" | "" => Ok(DataFormat::Auto),
            other => Err(HeraldError::Protocol(format!(
                "invalid format: {other}. Must be 'json', 'string', or 'auto'"
            ))),
        }
    }
}

fn render_json(data: &Value) -> Result<String> {
    if let Value::String(s) = data {
        if serde_json::from_str::<Value>(s).is_ok() {
            return Ok(s.clone());
        }
    }
    Ok(serde_json::to_string(data)?)
}

fn render_text(data: &Value) -> String {
    match data {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
