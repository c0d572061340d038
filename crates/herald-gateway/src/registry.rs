use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use herald_core::{HeraldError, Result};
use herald_protocol::{ConnectionInfo, Event, Target};
use tracing::info;

use crate::server::BroadcastServer;

/// What a producer needs from a broadcast server.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn broadcast(&self, event: Event) -> usize;

    async fn broadcast_to_topic(&self, topic: &str, event: Event) -> usize;

    async fn send_to_connection(&self, conn_id: &str, event: Event) -> Result<()>;

    fn connection_snapshot(&self) -> Vec<ConnectionInfo>;
}

#[async_trait]
impl EventPublisher for BroadcastServer {
    async fn broadcast(&self, event: Event) -> usize {
        self.broadcast_event(event).await
    }

    async fn broadcast_to_topic(&self, topic: &str, event: Event) -> usize {
        self.broadcast_event_to_topic(topic, event).await
    }

    async fn send_to_connection(&self, conn_id: &str, event: Event) -> Result<()> {
        self.send_event_to_connection(conn_id, event).await
    }

    fn connection_snapshot(&self) -> Vec<ConnectionInfo> {
        self.active_connections()
    }
}

/// Route `event` to `target`. Returns the number of connections reached.
pub async fn publish(publisher: &dyn EventPublisher, target: &Target, event: Event) -> Result<usize> {
    match target {
        Target::All => Ok(publisher.broadcast(event).await),
        Target::Topic(topic) => Ok(publisher.broadcast_to_topic(topic, event).await),
        Target::Connection(id) => publisher.send_to_connection(id, event).await.map(|()| 1),
    }
}

/// Named broadcast servers, shared with whoever produces events.
///
/// Producers look servers up by name instead of holding a global.
#[derive(Clone, Default)]
pub struct ServerRegistry {
    servers: Arc<DashMap<String, Arc<dyn EventPublisher>>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `publisher` under `name`, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, publisher: Arc<dyn EventPublisher>) {
        let name = name.into();
        info!(server = %name, "broadcast server registered");
        self.servers.insert(name, publisher);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn EventPublisher>> {
        self.servers
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| HeraldError::ServerNotFound {
                name: name.to_string(),
            })
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.servers.remove(name).is_some()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::ServerConfig;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventPublisher for Capture {
        async fn broadcast(&self, event: Event) -> usize {
            self.calls.lock().unwrap().push(format!("all:{}", event.data));
            3
        }

        async fn broadcast_to_topic(&self, topic: &str, event: Event) -> usize {
            self.calls.lock().unwrap().push(format!("topic:{topic}:{}", event.data));
            1
        }

        async fn send_to_connection(&self, conn_id: &str, _event: Event) -> Result<()> {
            if conn_id == "known" {
                Ok(())
            } else {
                Err(HeraldError::ConnectionNotFound { id: conn_id.into() })
            }
        }

        fn connection_snapshot(&self) -> Vec<ConnectionInfo> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn publish_routes_by_target() {
        let cap = Capture::default();
        assert_eq!(publish(&cap, &Target::All, Event::new("a")).await.unwrap(), 3);
        assert_eq!(
            publish(&cap, &Target::Topic("t".into()), Event::new("b")).await.unwrap(),
            1
        );
        assert_eq!(
            publish(&cap, &Target::Connection("known".into()), Event::new("c"))
                .await
                .unwrap(),
            1
        );
        assert!(publish(&cap, &Target::Connection("nope".into()), Event::new("d"))
            .await
            .is_err());
        assert_eq!(*cap.calls.lock().unwrap(), ["all:a", "topic:t:b"]);
    }

    #[test]
    fn registry_lookup() {
        let registry = ServerRegistry::new();
        let server = BroadcastServer::new(ServerConfig::default()).unwrap();
        registry.register("default", Arc::new(server));
        registry.register("audit", Arc::new(Capture::default()));

        assert_eq!(registry.names(), ["audit", "default"]);
        assert!(registry.get("default").is_ok());
        assert!(matches!(
            registry.get("missing"),
            Err(HeraldError::ServerNotFound { .. })
        ));
        assert!(registry.unregister("audit"));
        assert!(!registry.unregister("audit"));
    }
}
