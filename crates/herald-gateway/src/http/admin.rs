use axum::{extract::State, Json};
use herald_protocol::ConnectionInfo;
use serde_json::{json, Value};

use crate::server::BroadcastServer;

/// GET {path}/health: liveness probe.
pub async fn health_handler(State(server): State<BroadcastServer>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "activeConnections": server.connection_count(),
    }))
}

/// GET {path}/metrics: counters plus the current history depth.
pub async fn metrics_handler(State(server): State<BroadcastServer>) -> Json<Value> {
    let snap = server.metrics();
    Json(json!({
        "connections": snap.connections,
        "totalConnections": snap.total_connections,
        "events": snap.events,
        "bytes": snap.bytes,
        "errors": snap.errors,
        "bufferedEvents": server.history().map(|h| h.count()).unwrap_or(0),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET {path}/connections
pub async fn connections_handler(
    State(server): State<BroadcastServer>,
) -> Json<Vec<ConnectionInfo>> {
    Json(server.active_connections())
}
