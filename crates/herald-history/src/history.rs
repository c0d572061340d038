use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use herald_protocol::Event;
use tracing::debug;

/// An event as retained for replay.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub event: Event,
    /// Monotonic receive time, used for TTL decisions.
    pub received_at: Instant,
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    /// Oldest at the front. Sequence numbers are contiguous front to back.
    events: VecDeque<StoredEvent>,
    /// Event id -> sequence number of the newest entry carrying that id.
    index: HashMap<String, u64>,
    next_seq: u64,
}

impl Inner {
    fn pop_front(&mut self) -> Option<StoredEvent> {
        let stored = self.events.pop_front()?;
        if let Some(id) = stored.event.cursor() {
            // A later event may have reused the id; only drop our own entry.
            if self.index.get(id) == Some(&stored.seq) {
                self.index.remove(id);
            }
        }
        Some(stored)
    }

    fn position_of(&self, id: &str) -> Option<usize> {
        let seq = *self.index.get(id)?;
        let front = self.events.front()?.seq;
        usize::try_from(seq.checked_sub(front)?).ok()
    }

    fn collect_from(&self, start: usize) -> Vec<Event> {
        self.events
            .iter()
            .skip(start)
            .map(|s| s.event.clone())
            .collect()
    }
}

/// Bounded, time-bounded, chronologically ordered replay buffer.
///
/// All operations are in-memory bookkeeping and cannot fail. Readers share a
/// read lock; inserts, eviction and sweeps take the write lock. No lock is
/// ever held across I/O. Callers get owned `Vec<Event>` snapshots.
pub struct EventHistory {
    max_size: usize,
    ttl: Option<Duration>,
    inner: RwLock<Inner>,
}

impl EventHistory {
    /// `ttl = None` keeps events until they are pushed out by size.
    pub fn new(max_size: usize, ttl: Option<Duration>) -> Self {
        Self {
            max_size,
            ttl,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append at the tail, then evict from the head until within `max_size`.
    pub fn add_event(&self, event: Event) {
        let mut inner = self.write();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        if let Some(id) = event.cursor() {
            inner.index.insert(id.to_string(), seq);
        }
        inner.events.push_back(StoredEvent {
            event,
            received_at: Instant::now(),
            seq,
        });

        while inner.events.len() > self.max_size {
            if inner.pop_front().is_none() {
                break;
            }
        }
    }

    /// Events a client missed since `last_id`, oldest first.
    ///
    /// - empty `last_id`: the whole buffer
    /// - known `last_id`: every event strictly after it
    /// - unknown `last_id` (evicted or never seen): the whole buffer, so a
    ///   client may receive duplicates but never silently misses events
    pub fn events_since(&self, last_id: &str) -> Vec<Event> {
        let inner = self.read();
        if last_id.is_empty() {
            return inner.collect_from(0);
        }
        match inner.position_of(last_id) {
            Some(pos) => inner.collect_from(pos + 1),
            None => {
                debug!(last_id, "replay cursor not in history, returning full buffer");
                inner.collect_from(0)
            }
        }
    }

    /// Whole buffer, oldest first.
    pub fn all_events(&self) -> Vec<Event> {
        self.read().collect_from(0)
    }

    pub fn count(&self) -> usize {
        self.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Administrative reset.
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.events.clear();
        inner.index.clear();
    }

    /// Drop every entry whose age exceeds the TTL. Returns how many were removed.
    pub fn remove_expired(&self) -> usize {
        self.remove_expired_at(Instant::now())
    }

    /// Same as [`remove_expired`](Self::remove_expired) against an explicit clock.
    ///
    /// Entries are chronological, so the walk stops at the first survivor.
    pub fn remove_expired_at(&self, now: Instant) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };

        let mut inner = self.write();
        let mut removed = 0;
        while let Some(front) = inner.events.front() {
            if now.saturating_duration_since(front.received_at) <= ttl {
                break;
            }
            inner.pop_front();
            removed += 1;
        }
        removed
    }

    /// Full stored entries, oldest first (includes receive times).
    pub fn stored(&self) -> Vec<StoredEvent> {
        self.read().events.iter().cloned().collect()
    }
}
