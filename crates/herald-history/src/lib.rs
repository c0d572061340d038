//! `herald-history`: bounded in-memory replay buffer.
//!
//! # Overview
//!
//! [`EventHistory`] keeps the most recent broadcast events, bounded both by
//! count and by age, so a reconnecting client can ask for everything after
//! the last event id it saw.
//!
//! | Operation      | Behaviour                                            |
//! |----------------|------------------------------------------------------|
//! | `add_event`    | Append, then evict oldest until within `max_size`    |
//! | `events_since` | Suffix after a known id; whole buffer otherwise      |
//! | sweep          | Drop entries older than the TTL, oldest first        |

pub mod history;
pub mod sweeper;

pub use history::{EventHistory, StoredEvent};
