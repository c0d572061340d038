use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use herald_core::config::CONNECTED_EVENT;
use herald_core::{ConnId, EventId, HeraldError, Result};
use herald_protocol::{ConnectionInfo, ConnectionNotice, Event};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::sink::EventSink;

/// Connection lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Connecting = 0,
    Active = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnState::Connecting,
            1 => ConnState::Active,
            2 => ConnState::Closing,
            _ => ConnState::Closed,
        }
    }
}

/// Everything known about a subscriber at accept time. Immutable afterwards.
#[derive(Debug, Clone)]
pub struct ConnectionMeta {
    pub id: String,
    pub client_address: String,
    pub user_agent: String,
    pub headers: BTreeMap<String, String>,
    pub query_parameters: BTreeMap<String, String>,
    /// Empty means "all topics".
    pub topic: String,
    pub last_event_id: String,
    pub connected_at: DateTime<Utc>,
}

impl ConnectionMeta {
    /// Fresh metadata with a generated id and no request details.
    pub fn new() -> Self {
        Self {
            id: ConnId::new().0,
            client_address: String::new(),
            user_agent: String::new(),
            headers: BTreeMap::new(),
            query_parameters: BTreeMap::new(),
            topic: String::new(),
            last_event_id: String::new(),
            connected_at: Utc::now(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_last_event_id(mut self, id: impl Into<String>) -> Self {
        self.last_event_id = id.into();
        self
    }
}

impl Default for ConnectionMeta {
    fn default() -> Self {
        Self::new()
    }
}

type CloseHook = Box<dyn Fn(&str) + Send + Sync>;

/// One subscriber's live stream.
///
/// Writes are serialized through an async mutex around the sink, so frames
/// from concurrent producers never interleave. `close` is idempotent: the
/// first caller runs the close hook, marks the connection `Closed` and only
/// then cancels the stream. Later callers return immediately.
pub struct Connection {
    meta: ConnectionMeta,
    opened: Instant,
    state: AtomicU8,
    writer: Mutex<Box<dyn EventSink>>,
    cancel: CancellationToken,
    on_close: OnceLock<CloseHook>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.meta.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// Create the connection and write the `connected` handshake.
    ///
    /// The handshake carries a generated id and
    /// `{"connectionId": ..., "timestamp": ...}` as data. On success the
    /// connection is `Active`; on failure it is already closed.
    pub async fn open(
        meta: ConnectionMeta,
        sink: Box<dyn EventSink>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>> {
        let conn = Arc::new(Self {
            meta,
            opened: Instant::now(),
            state: AtomicU8::new(ConnState::Connecting as u8),
            writer: Mutex::new(sink),
            cancel,
            on_close: OnceLock::new(),
        });

        let hello = serde_json::json!({
            "connectionId": conn.meta.id,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let handshake = Event::new(hello.to_string())
            .with_id(EventId::new().into_string())
            .with_type(CONNECTED_EVENT);
        conn.write(&handshake).await?;

        conn.state
            .compare_exchange(
                ConnState::Connecting as u8,
                ConnState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| HeraldError::ConnectionClosed {
                id: conn.meta.id.clone(),
            })?;
        Ok(conn)
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn topic(&self) -> &str {
        &self.meta.topic
    }

    pub fn last_event_id(&self) -> &str {
        &self.meta.last_event_id
    }

    pub fn client_address(&self) -> &str {
        &self.meta.client_address
    }

    /// Time since the connection was opened.
    pub fn age(&self) -> Duration {
        self.opened.elapsed()
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnState::Active
    }

    /// Whether a topic broadcast for `topic` reaches this connection.
    pub fn receives_topic(&self, topic: &str) -> bool {
        self.meta.topic.is_empty() || self.meta.topic == topic
    }

    /// Encode and write one event. Returns the number of bytes written.
    ///
    /// Fails without writing when the connection is not active. A failed
    /// write closes the connection.
    pub async fn send_event(&self, event: &Event) -> Result<usize> {
        if !self.is_active() {
            return Err(HeraldError::ConnectionClosed {
                id: self.meta.id.clone(),
            });
        }
        self.write(event).await
    }

    async fn write(&self, event: &Event) -> Result<usize> {
        let frame = event.encode();
        let len = frame.len();

        let mut writer = self.writer.lock().await;
        // close() may have won the race while we waited for the lock
        if matches!(self.state(), ConnState::Closing | ConnState::Closed) {
            return Err(HeraldError::ConnectionClosed {
                id: self.meta.id.clone(),
            });
        }
        match writer.write_frame(frame).await {
            Ok(()) => Ok(len),
            Err(e) => {
                drop(writer);
                warn!(conn_id = %self.meta.id, error = %e, "write failed, closing connection");
                self.close();
                Err(HeraldError::Transport {
                    conn_id: self.meta.id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Register the callback run once on close. Only the first registration
    /// takes effect; returns `false` if a hook was already installed.
    ///
    /// A hook installed after the connection closed is never called, so
    /// callers must re-check [`is_active`](Self::is_active) afterwards.
    pub fn on_close(&self, hook: impl Fn(&str) + Send + Sync + 'static) -> bool {
        self.on_close.set(Box::new(hook)).is_ok()
    }

    /// Close the stream. Safe to call any number of times from any task.
    pub fn close(&self) {
        let won = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                match ConnState::from_u8(raw) {
                    ConnState::Connecting | ConnState::Active => Some(ConnState::Closing as u8),
                    ConnState::Closing | ConnState::Closed => None,
                }
            })
            .is_ok();
        if !won {
            return;
        }

        if let Some(hook) = self.on_close.get() {
            hook(&self.meta.id);
        }
        self.state.store(ConnState::Closed as u8, Ordering::Release);
        self.cancel.cancel();
        debug!(conn_id = %self.meta.id, "connection closed");
    }

    /// Resolves once the connection has ended and is `Closed`.
    ///
    /// The stream token may also fire from outside (server shutdown or the
    /// HTTP body going away); the close hook has run by the time this returns.
    pub async fn done(&self) {
        self.cancel.cancelled().await;
        self.close();
    }

    /// Token cancelled when this connection ends.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.meta.id.clone(),
            client_address: self.meta.client_address.clone(),
            user_agent: self.meta.user_agent.clone(),
            topic: self.meta.topic.clone(),
            last_event_id: self.meta.last_event_id.clone(),
            connected_at: self.meta.connected_at.to_rfc3339(),
            is_active: self.is_active(),
        }
    }

    pub fn notice(&self) -> ConnectionNotice {
        ConnectionNotice {
            connection_id: self.meta.id.clone(),
            client_address: self.meta.client_address.clone(),
            user_agent: self.meta.user_agent.clone(),
            headers: self.meta.headers.clone(),
            query_parameters: self.meta.query_parameters.clone(),
            topic: self.meta.topic.clone(),
            last_seen_event_id: self.meta.last_event_id.clone(),
            timestamp: self.meta.connected_at.to_rfc3339(),
        }
    }
}
