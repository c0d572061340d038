use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Announcement emitted once per accepted stream, consumed by whatever
/// reacts to new subscribers (a workflow engine, an audit log, ...).
///
/// Wire: `{ "connectionId": "...", "clientAddress": "10.0.0.4", "topic": "orders", ... }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionNotice {
    pub connection_id: String,
    pub client_address: String,
    pub user_agent: String,
    pub headers: BTreeMap<String, String>,
    pub query_parameters: BTreeMap<String, String>,
    /// Empty means "subscribed to everything".
    pub topic: String,
    pub last_seen_event_id: String,
    /// RFC3339 accept time.
    pub timestamp: String,
}

/// Point-in-time view of one registered connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: String,
    pub client_address: String,
    pub user_agent: String,
    pub topic: String,
    pub last_event_id: String,
    pub connected_at: String,
    pub is_active: bool,
}
