use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Per-connection identifier (random UUID, not persisted).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnId(pub String);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-generated event identifier (UUIDv7, time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_ids_are_unique() {
        assert_ne!(ConnId::new(), ConnId::new());
    }

    #[test]
    fn generated_event_ids_are_unique() {
        let ids: std::collections::HashSet<_> = (0..64).map(|_| EventId::new()).collect();
        assert_eq!(ids.len(), 64);
    }
}
