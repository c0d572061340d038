use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use herald_core::config::{KEEP_ALIVE_DATA, KEEP_ALIVE_EVENT};
use herald_core::{HeraldError, Result, ServerConfig};
use herald_history::{sweeper, EventHistory};
use herald_protocol::{ConnectionInfo, ConnectionNotice, Event};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::connection::Connection;
use crate::cors::CorsPolicy;
use crate::dispatch::{self, HandlerBinding};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::request::StreamRequest;
use crate::sink::EventSink;

/// Frames buffered per subscriber on top of a full history replay.
const STREAM_HEADROOM: usize = 32;

/// Shared state behind every clone of [`BroadcastServer`].
struct ServerInner {
    config: ServerConfig,
    cors: CorsPolicy,
    /// Live registry: conn_id -> connection.
    connections: DashMap<String, Arc<Connection>>,
    history: Option<Arc<EventHistory>>,
    metrics: Metrics,
    shutdown: CancellationToken,
    notices: mpsc::Sender<ConnectionNotice>,
    /// Taken once by `spawn_background`.
    notice_rx: Mutex<Option<mpsc::Receiver<ConnectionNotice>>>,
}

impl ServerInner {
    /// Remove `id` from the registry, releasing its slot only if it was
    /// actually there. Called from the close hook and from `accept`.
    fn deregister(&self, id: &str) {
        if self.connections.remove(id).is_some() {
            self.metrics.release_slot();
            debug!(conn_id = %id, remaining = self.connections.len(), "connection deregistered");
        }
    }
}

/// Owns every live subscriber, the replay history and the counters.
///
/// Cheap to clone; all clones share one server.
#[derive(Clone)]
pub struct BroadcastServer {
    inner: Arc<ServerInner>,
}

/// Handles of the long-running tasks started by
/// [`BroadcastServer::spawn_background`].
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Wait for every task to finish. Tasks stop when the server stops.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
    }
}

impl BroadcastServer {
    /// Validate `config` and build the server. Nothing is spawned yet.
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.ensure_valid()?;

        let history = config.enable_event_store.then(|| {
            Arc::new(EventHistory::new(
                config.event_store_size,
                Some(config.event_ttl()),
            ))
        });
        let (notices, notice_rx) = mpsc::channel(config.dispatch_queue_capacity.max(1));

        info!(
            path = %config.path,
            max_connections = config.max_connections,
            history = config.enable_event_store,
            cors = config.enable_cors,
            "broadcast server configured"
        );

        Ok(Self {
            inner: Arc::new(ServerInner {
                cors: CorsPolicy::parse(&config.cors_origins),
                config,
                connections: DashMap::new(),
                history,
                metrics: Metrics::default(),
                shutdown: CancellationToken::new(),
                notices,
                notice_rx: Mutex::new(Some(notice_rx)),
            }),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn cors(&self) -> &CorsPolicy {
        &self.inner.cors
    }

    pub fn history(&self) -> Option<&Arc<EventHistory>> {
        self.inner.history.as_ref()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Connections currently holding a slot.
    pub fn connection_count(&self) -> usize {
        self.inner.metrics.active()
    }

    /// Cancelled when [`stop`](Self::stop) runs.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Per-subscriber buffer size: room for a full replay plus live traffic.
    pub fn stream_buffer(&self) -> usize {
        let replay = if self.inner.config.enable_event_store {
            self.inner.config.event_store_size
        } else {
            0
        };
        replay + STREAM_HEADROOM
    }

    /// Start the heartbeat, the history sweeper and the notice dispatcher.
    /// Can only be called once per server.
    pub fn spawn_background(&self, handlers: Vec<HandlerBinding>) -> Result<BackgroundTasks> {
        let notice_rx = self
            .inner
            .notice_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| HeraldError::Internal("background tasks already started".into()))?;

        let mut handles = vec![
            tokio::spawn(dispatch::run_dispatcher(
                notice_rx,
                handlers,
                self.inner.shutdown.clone(),
            )),
            self.spawn_heartbeat(),
        ];
        if let Some(history) = &self.inner.history {
            if let Some(handle) = sweeper::spawn_sweeper(
                history.clone(),
                self.inner.config.sweep_interval(),
                self.inner.shutdown.clone(),
            ) {
                handles.push(handle);
            }
        }
        Ok(BackgroundTasks { handles })
    }

    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let server = self.clone();
        let every = self.inner.config.keep_alive();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = server.inner.shutdown.cancelled() => break,
                    _ = tick.tick() => server.send_keep_alive().await,
                }
            }
            debug!("heartbeat stopped");
        })
    }

    /// Write one `keep-alive` event to every connection. Not stored in history.
    pub async fn send_keep_alive(&self) {
        let targets = self.snapshot(|_| true);
        if targets.is_empty() {
            return;
        }
        let ping = Event::new(KEEP_ALIVE_DATA).with_type(KEEP_ALIVE_EVENT);
        let sent = self.fan_out(&targets, &ping).await;
        debug!(sent, total = targets.len(), "keep-alive sent");
    }

    /// Admit a new subscriber.
    ///
    /// Order matters: method, shutdown and capacity checks come first; then
    /// the handshake; then the replay of missed events; only then does the
    /// connection join the live registry, so replayed and live events can
    /// never interleave out of order. The notice is queued last.
    #[instrument(skip_all, fields(client = %request.client_address, topic = %request.topic))]
    pub async fn accept(
        &self,
        request: StreamRequest,
        sink: Box<dyn EventSink>,
    ) -> Result<Arc<Connection>> {
        if request.method != axum::http::Method::GET {
            return Err(HeraldError::MethodNotAllowed {
                method: request.method.to_string(),
            });
        }
        if self.is_shutting_down() {
            return Err(HeraldError::ShuttingDown);
        }

        let max = self.inner.config.max_connections;
        let active = self
            .inner
            .metrics
            .try_acquire_slot(max)
            .map_err(|active| {
                warn!(active, max, "connection limit reached, rejecting subscriber");
                HeraldError::CapacityExceeded { active, max }
            })?;
        debug!(active, max, "slot reserved for new connection");

        let conn = match Connection::open(
            request.into_meta(),
            sink,
            self.inner.shutdown.child_token(),
        )
        .await
        {
            Ok(conn) => conn,
            Err(e) => {
                self.inner.metrics.release_slot();
                self.inner.metrics.record_error();
                return Err(e);
            }
        };
        self.inner.metrics.record_connection();
        info!(
            conn_id = %conn.id(),
            client = %conn.client_address(),
            topic = %conn.topic(),
            last_event_id = %conn.last_event_id(),
            "SSE connection established"
        );

        if !conn.last_event_id().is_empty() {
            self.replay(&conn).await;
        }

        let weak: Weak<ServerInner> = Arc::downgrade(&self.inner);
        conn.on_close(move |id| {
            if let Some(inner) = weak.upgrade() {
                inner.deregister(id);
            }
        });
        self.inner
            .connections
            .insert(conn.id().to_string(), conn.clone());
        if !conn.is_active() {
            // closed before the hook was installed
            self.inner.deregister(conn.id());
        }

        self.notify(&conn);
        self.watch(conn.clone());
        Ok(conn)
    }

    async fn replay(&self, conn: &Arc<Connection>) {
        let Some(history) = &self.inner.history else {
            return;
        };
        let missed = history.events_since(conn.last_event_id());
        if missed.is_empty() {
            return;
        }

        let mut replayed = 0usize;
        for event in &missed {
            match conn.send_event(event).await {
                Ok(bytes) => {
                    replayed += 1;
                    self.inner.metrics.record_bytes(bytes);
                }
                Err(e) => {
                    self.inner.metrics.record_error();
                    warn!(conn_id = %conn.id(), error = %e, "replay aborted");
                    break;
                }
            }
        }
        info!(
            conn_id = %conn.id(),
            replayed,
            since = %conn.last_event_id(),
            "missed events replayed"
        );
    }

    fn notify(&self, conn: &Connection) {
        match self.inner.notices.try_send(conn.notice()) {
            Ok(()) => {}
            Err(TrySendError::Full(notice)) => {
                self.inner.metrics.record_error();
                warn!(conn_id = %notice.connection_id, "notice queue full, dropping connection notice");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id = %conn.id(), "no dispatcher running, connection notice discarded");
            }
        }
    }

    /// Close the connection once its token fires, whoever fired it.
    fn watch(&self, conn: Arc<Connection>) {
        tokio::spawn(async move {
            conn.done().await;
            info!(
                conn_id = %conn.id(),
                duration_secs = conn.age().as_secs_f64(),
                "SSE connection ended"
            );
        });
    }

    /// Clone matching connections out of the registry so no map guard is
    /// held across a write.
    fn snapshot(&self, keep: impl Fn(&Connection) -> bool) -> Vec<Arc<Connection>> {
        self.inner
            .connections
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    async fn fan_out(&self, targets: &[Arc<Connection>], event: &Event) -> usize {
        let results = join_all(targets.iter().map(|conn| conn.send_event(event))).await;
        let mut sent = 0;
        for (conn, result) in targets.iter().zip(results) {
            match result {
                Ok(bytes) => {
                    sent += 1;
                    self.inner.metrics.record_bytes(bytes);
                }
                Err(e) => {
                    self.inner.metrics.record_error();
                    warn!(conn_id = %conn.id(), error = %e, "failed to deliver event");
                }
            }
        }
        sent
    }

    fn record(&self, event: &Event) {
        if let Some(history) = &self.inner.history {
            history.add_event(event.clone());
        }
        self.inner.metrics.record_event();
    }

    /// Store `event` in history and deliver it to every live connection.
    /// Returns how many connections accepted it.
    pub async fn broadcast_event(&self, event: Event) -> usize {
        self.record(&event);
        let targets = self.snapshot(|_| true);
        let sent = self.fan_out(&targets, &event).await;
        debug!(sent, total = targets.len(), "event broadcast");
        sent
    }

    /// Store `event` in history and deliver it to connections subscribed to
    /// `topic` or to no topic at all.
    #[instrument(skip(self, event), fields(event_id = event.cursor().unwrap_or_default()))]
    pub async fn broadcast_event_to_topic(&self, topic: &str, event: Event) -> usize {
        self.record(&event);
        let targets = self.snapshot(|c| c.receives_topic(topic));
        let sent = self.fan_out(&targets, &event).await;
        debug!(topic, sent, total = targets.len(), "topic event broadcast");
        sent
    }

    /// Deliver `event` to one connection. Not stored in history.
    pub async fn send_event_to_connection(&self, conn_id: &str, event: Event) -> Result<()> {
        let conn = self.get(conn_id)?;
        match conn.send_event(&event).await {
            Ok(bytes) => {
                self.inner.metrics.record_event();
                self.inner.metrics.record_bytes(bytes);
                Ok(())
            }
            Err(e) => {
                self.inner.metrics.record_error();
                Err(e)
            }
        }
    }

    fn get(&self, conn_id: &str) -> Result<Arc<Connection>> {
        self.inner
            .connections
            .get(conn_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| HeraldError::ConnectionNotFound {
                id: conn_id.to_string(),
            })
    }

    /// Snapshot of every registered connection, oldest first.
    pub fn active_connections(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .snapshot(|_| true)
            .iter()
            .map(|c| c.info())
            .collect();
        infos.sort_by(|a, b| {
            a.connected_at
                .cmp(&b.connected_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        infos
    }

    /// Force-close one connection. Its close hook deregisters it.
    pub fn close_connection(&self, conn_id: &str) -> Result<()> {
        let conn = self.get(conn_id)?;
        conn.close();
        info!(conn_id, "connection closed by server");
        Ok(())
    }

    /// Stop accepting, close every connection and wait (bounded by
    /// `shutdown_timeout`) for the registry to drain. Idempotent.
    pub async fn stop(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!(active = self.connection_count(), "stopping broadcast server");
        }
        self.inner.shutdown.cancel();

        for conn in self.snapshot(|_| true) {
            conn.close();
        }

        let drained = tokio::time::timeout(self.inner.config.shutdown_timeout(), async {
            while !self.inner.connections.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = self.inner.connections.len(),
                "shutdown timeout elapsed with connections still registered"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnState;
    use crate::sink::ChannelSink;
    use tokio::sync::mpsc::Receiver;

    fn config() -> ServerConfig {
        ServerConfig {
            max_connections: 2,
            ..ServerConfig::default()
        }
    }

    async fn subscribe(server: &BroadcastServer, req: StreamRequest) -> (Arc<Connection>, Receiver<String>) {
        let (sink, mut rx) = ChannelSink::pair(server.stream_buffer(), Duration::from_millis(200));
        let conn = server.accept(req, Box::new(sink)).await.unwrap();
        let handshake = rx.recv().await.unwrap();
        assert!(handshake.contains("event: connected"));
        (conn, rx)
    }

    #[tokio::test]
    async fn rejects_non_get() {
        let server = BroadcastServer::new(config()).unwrap();
        let (sink, _rx) = ChannelSink::pair(4, Duration::from_millis(50));
        let err = server
            .accept(
                StreamRequest::get().with_method(axum::http::Method::POST),
                Box::new(sink),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HeraldError::MethodNotAllowed { .. }));
        assert_eq!(server.connection_count(), 0);
    }

    #[tokio::test]
    async fn enforces_capacity() {
        let server = BroadcastServer::new(config()).unwrap();
        let (_a, _ra) = subscribe(&server, StreamRequest::get()).await;
        let (_b, _rb) = subscribe(&server, StreamRequest::get()).await;

        let (sink, _rx) = ChannelSink::pair(4, Duration::from_millis(50));
        let err = server
            .accept(StreamRequest::get(), Box::new(sink))
            .await
            .unwrap_err();
        assert!(matches!(err, HeraldError::CapacityExceeded { active: 2, max: 2 }));
        assert_eq!(server.connection_count(), 2);
    }

    #[tokio::test]
    async fn close_releases_slot_exactly_once() {
        let server = BroadcastServer::new(config()).unwrap();
        let (conn, _rx) = subscribe(&server, StreamRequest::get()).await;
        assert_eq!(server.connection_count(), 1);

        server.close_connection(conn.id()).unwrap();
        conn.close();
        assert_eq!(server.connection_count(), 0);
        assert!(server.active_connections().is_empty());
        assert!(matches!(
            server.close_connection(conn.id()),
            Err(HeraldError::ConnectionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn topic_fan_out() {
        let server = BroadcastServer::new(ServerConfig::default()).unwrap();
        let (_a, mut ra) = subscribe(&server, StreamRequest::get().with_topic("A")).await;
        let (_b, mut rb) = subscribe(&server, StreamRequest::get().with_topic("B")).await;
        let (_all, mut rall) = subscribe(&server, StreamRequest::get()).await;

        let sent = server
            .broadcast_event_to_topic("A", Event::new("x").with_id("1"))
            .await;
        assert_eq!(sent, 2);
        assert_eq!(ra.recv().await.unwrap(), "id: 1\ndata: x\n\n");
        assert_eq!(rall.recv().await.unwrap(), "id: 1\ndata: x\n\n");
        assert!(rb.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_unknown_connection() {
        let server = BroadcastServer::new(ServerConfig::default()).unwrap();
        let err = server
            .send_event_to_connection("missing", Event::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, HeraldError::ConnectionNotFound { .. }));
    }

    #[tokio::test]
    async fn replays_missed_events_before_live_ones() {
        let server = BroadcastServer::new(ServerConfig {
            event_store_size: 3,
            ..ServerConfig::default()
        })
        .unwrap();
        for id in ["E1", "E2", "E3", "E4"] {
            server.broadcast_event(Event::new(id).with_id(id)).await;
        }

        let (_conn, mut rx) =
            subscribe(&server, StreamRequest::get().with_last_event_id("E2")).await;
        server.broadcast_event(Event::new("E5").with_id("E5")).await;

        let mut ids = Vec::new();
        for _ in 0..3 {
            let frame = rx.recv().await.unwrap();
            ids.push(frame.lines().next().unwrap().to_string());
        }
        assert_eq!(ids, ["id: E3", "id: E4", "id: E5"]);
    }

    #[tokio::test]
    async fn stop_closes_everything_and_refuses_new_streams() {
        let server = BroadcastServer::new(config()).unwrap();
        let (a, _ra) = subscribe(&server, StreamRequest::get()).await;
        let (b, _rb) = subscribe(&server, StreamRequest::get()).await;

        server.stop().await;
        assert!(!a.is_active());
        assert!(!b.is_active());
        assert_eq!(server.connection_count(), 0);

        let (sink, _rx) = ChannelSink::pair(4, Duration::from_millis(50));
        let err = server
            .accept(StreamRequest::get(), Box::new(sink))
            .await
            .unwrap_err();
        assert!(matches!(err, HeraldError::ShuttingDown));

        // second stop is a no-op
        server.stop().await;
    }

    #[tokio::test]
    async fn background_tasks_start_once() {
        let server = BroadcastServer::new(ServerConfig::default()).unwrap();
        let tasks = server.spawn_background(Vec::new()).unwrap();
        assert!(server.spawn_background(Vec::new()).is_err());
        server.stop().await;
        tokio::time::timeout(Duration::from_secs(2), tasks.join())
            .await
            .expect("background tasks stop with the server");
    }

    struct Forward(mpsc::Sender<ConnectionNotice>);

    #[async_trait::async_trait]
    impl crate::dispatch::ConnectionHandler for Forward {
        fn name(&self) -> &str {
            "forward"
        }

        async fn on_connect(&self, notice: &ConnectionNotice) -> Result<()> {
            self.0
                .send(notice.clone())
                .await
                .map_err(|e| HeraldError::Internal(e.to_string()))
        }
    }

    #[tokio::test]
    async fn accepted_connections_produce_notices() {
        let server = BroadcastServer::new(ServerConfig::default()).unwrap();
        let (tx, mut seen) = mpsc::channel(4);
        let tasks = server
            .spawn_background(vec![HandlerBinding::for_topic("orders", Arc::new(Forward(tx)))])
            .unwrap();

        let (_ignored, _r1) = subscribe(&server, StreamRequest::get().with_topic("billing")).await;
        let (conn, _r2) = subscribe(
            &server,
            StreamRequest::get().with_topic("orders").with_last_event_id("E9"),
        )
        .await;

        let notice = tokio::time::timeout(Duration::from_secs(1), seen.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notice.connection_id, conn.id());
        assert_eq!(notice.topic, "orders");
        assert_eq!(notice.last_seen_event_id, "E9");

        server.stop().await;
        tasks.join().await;
        assert!(seen.try_recv().is_err());
    }

    #[tokio::test]
    async fn keep_alive_reaches_live_streams_and_drops_dead_ones() {
        let server = BroadcastServer::new(config()).unwrap();
        let (live, mut live_rx) = subscribe(&server, StreamRequest::get()).await;
        let (dead, dead_rx) = subscribe(&server, StreamRequest::get().with_topic("t")).await;
        drop(dead_rx);
        assert_eq!(server.connection_count(), 2);

        server.send_keep_alive().await;

        assert_eq!(live_rx.recv().await.unwrap(), "event: keep-alive\ndata: ping\n\n");
        assert!(live.is_active());
        assert_eq!(dead.state(), ConnState::Closed);
        assert_eq!(server.connection_count(), 1);
        assert_eq!(server.active_connections()[0].id, live.id());
        assert!(server.history().map_or(true, |h| h.all_events().is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_fires_every_interval() {
        let server = BroadcastServer::new(ServerConfig {
            keep_alive_interval: 10,
            ..config()
        })
        .unwrap();
        let (_conn, mut rx) = subscribe(&server, StreamRequest::get()).await;
        let tasks = server.spawn_background(Vec::new()).unwrap();

        // nothing before the first interval elapses
        assert!(tokio::time::timeout(Duration::from_secs(9), rx.recv()).await.is_err());

        for _ in 0..2 {
            let frame = tokio::time::timeout(Duration::from_secs(11), rx.recv())
                .await
                .expect("keep-alive within one interval")
                .unwrap();
            assert_eq!(frame, "event: keep-alive\ndata: ping\n\n");
        }

        server.stop().await;
        tasks.join().await;
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let result = BroadcastServer::new(ServerConfig {
            max_connections: 0,
            ..ServerConfig::default()
        });
        assert!(matches!(result, Err(HeraldError::Validation(_))));
    }
}
