//! New-connection notices, fanned out to registered handlers off the
//! accept path.
//!
//! The server pushes one [`ConnectionNotice`] per accepted stream into a
//! bounded queue with `try_send`; a single dispatcher task drains it and
//! invokes every matching handler in registration order. A slow handler
//! delays later notices but never a subscriber.

use std::sync::Arc;

use async_trait::async_trait;
use herald_core::Result;
use herald_protocol::ConnectionNotice;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Reacts to newly accepted subscribers (audit log, workflow trigger, ...).
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn on_connect(&self, notice: &ConnectionNotice) -> Result<()>;
}

/// A handler plus the topic it cares about.
#[derive(Clone)]
pub struct HandlerBinding {
    /// `None` or empty receives every notice.
    pub topic: Option<String>,
    pub handler: Arc<dyn ConnectionHandler>,
}

impl HandlerBinding {
    pub fn all(handler: Arc<dyn ConnectionHandler>) -> Self {
        Self { topic: None, handler }
    }

    pub fn for_topic(topic: impl Into<String>, handler: Arc<dyn ConnectionHandler>) -> Self {
        Self {
            topic: Some(topic.into()),
            handler,
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        match self.topic.as_deref() {
            None | Some("") => true,
            Some(wanted) => wanted == topic,
        }
    }
}

/// Drain `rx` until it closes or `shutdown` fires.
pub(crate) async fn run_dispatcher(
    mut rx: mpsc::Receiver<ConnectionNotice>,
    bindings: Vec<HandlerBinding>,
    shutdown: CancellationToken,
) {
    info!(handlers = bindings.len(), "connection dispatcher started");
    loop {
        let notice = tokio::select! {
            _ = shutdown.cancelled() => break,
            notice = rx.recv() => match notice {
                Some(n) => n,
                None => break,
            },
        };

        for binding in bindings.iter().filter(|b| b.matches(&notice.topic)) {
            if let Err(e) = binding.handler.on_connect(&notice).await {
                warn!(
                    handler = binding.handler.name(),
                    conn_id = %notice.connection_id,
                    error = %e,
                    "connection handler failed"
                );
            }
        }
    }
    info!("connection dispatcher stopped");
}

/// Logs every notice as structured fields.
pub struct LogHandler;

#[async_trait]
impl ConnectionHandler for LogHandler {
    fn name(&self) -> &str {
        "log"
    }

    async fn on_connect(&self, notice: &ConnectionNotice) -> Result<()> {
        info!(
            conn_id = %notice.connection_id,
            client = %notice.client_address,
            topic = %notice.topic,
            user_agent = %notice.user_agent,
            last_event_id = %notice.last_seen_event_id,
            "subscriber connected"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::HeraldError;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ConnectionHandler for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn on_connect(&self, notice: &ConnectionNotice) -> Result<()> {
            self.seen.lock().unwrap().push(notice.connection_id.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl ConnectionHandler for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn on_connect(&self, _notice: &ConnectionNotice) -> Result<()> {
            Err(HeraldError::Internal("boom".into()))
        }
    }

    fn notice(id: &str, topic: &str) -> ConnectionNotice {
        ConnectionNotice {
            connection_id: id.into(),
            client_address: "127.0.0.1".into(),
            user_agent: String::new(),
            headers: BTreeMap::new(),
            query_parameters: BTreeMap::new(),
            topic: topic.into(),
            last_seen_event_id: String::new(),
            timestamp: String::new(),
        }
    }

    #[test]
    fn binding_topic_matching() {
        let h: Arc<dyn ConnectionHandler> = Arc::new(LogHandler);
        assert!(HandlerBinding::all(h.clone()).matches("anything"));
        assert!(HandlerBinding::for_topic("", h.clone()).matches("x"));
        assert!(HandlerBinding::for_topic("orders", h.clone()).matches("orders"));
        assert!(!HandlerBinding::for_topic("orders", h).matches("billing"));
    }

    #[tokio::test]
    async fn routes_by_topic_and_survives_handler_errors() {
        let everything = Arc::new(Recorder::default());
        let orders_only = Arc::new(Recorder::default());
        let bindings = vec![
            HandlerBinding::all(Arc::new(Failing)),
            HandlerBinding::all(everything.clone()),
            HandlerBinding::for_topic("orders", orders_only.clone()),
        ];

        let (tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_dispatcher(rx, bindings, shutdown.clone()));

        tx.send(notice("c1", "orders")).await.unwrap();
        tx.send(notice("c2", "billing")).await.unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("dispatcher exits when the queue closes")
            .unwrap();

        assert_eq!(*everything.seen.lock().unwrap(), ["c1", "c2"]);
        assert_eq!(*orders_only.seen.lock().unwrap(), ["c1"]);
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let (_tx, rx) = mpsc::channel::<ConnectionNotice>(1);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_dispatcher(rx, Vec::new(), shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("dispatcher exits on shutdown")
            .unwrap();
    }
}
