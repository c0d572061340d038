use axum::{extract::State, Json};
use chrono::Utc;
use herald_core::{EventId, HeraldError};
use herald_protocol::event::PUBLISH_EVENT_TYPES;
use herald_protocol::{DataFormat, Event, Target};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::http::error::ApiError;
use crate::registry;
use crate::server::BroadcastServer;

/// Body of `POST {path}/publish`.
///
/// Routing: `target` (`all`, `topic:NAME`, `connection:ID`) wins over
/// `connectionId`, which wins over `topic`; none of them means everyone.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub target: Option<String>,
    pub connection_id: Option<String>,
    pub topic: Option<String>,
    /// Generated when absent.
    pub id: Option<String>,
    /// Defaults to `message`. Must be one of [`PUBLISH_EVENT_TYPES`].
    pub event: Option<String>,
    /// Required; JSON `null` counts as missing.
    #[serde(default)]
    pub data: Option<Value>,
    pub format: Option<String>,
    pub retry: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReply {
    pub success: bool,
    pub sent_count: usize,
    pub event_id: String,
    pub timestamp: String,
}

pub async fn publish_handler(
    State(server): State<BroadcastServer>,
    Json(req): Json<PublishRequest>,
) -> Result<Json<PublishReply>, ApiError> {
    let target = Target::resolve(
        req.target.as_deref(),
        req.connection_id.as_deref(),
        req.topic.as_deref(),
    )?;
    let format: DataFormat = req.format.as_deref().unwrap_or_default().parse()?;
    let payload = req
        .data
        .ok_or_else(|| HeraldError::Protocol("data cannot be null".into()))?;
    let data = format.render(&payload)?;

    let event_id = req
        .id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| EventId::new().into_string());
    let event_type = req
        .event
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "message".to_string());
    if !PUBLISH_EVENT_TYPES.contains(&event_type.as_str()) {
        return Err(HeraldError::Protocol(format!("invalid event type: {event_type}")).into());
    }

    let mut event = Event::new(data)
        .with_id(event_id.clone())
        .with_type(event_type);
    if let Some(retry) = req.retry {
        event = event.with_retry(retry);
    }
    event.validate()?;

    let sent_count = registry::publish(&server, &target, event).await?;
    info!(route = %target, event_id = %event_id, sent_count, "event published");

    Ok(Json(PublishReply {
        success: true,
        sent_count,
        event_id,
        timestamp: Utc::now().to_rfc3339(),
    }))
}
