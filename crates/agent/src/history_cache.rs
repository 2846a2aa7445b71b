//! Bounded session-history cache.
//!
//! A fast path in front of the conversation store, owned by the dispatch
//! loop — the store stays the source of truth and is re-read whenever a
//! session is missing or invalidated. Least-recently-used sessions are
//! evicted at capacity.

use campusd_core::message::{Message, SessionId};
use std::collections::HashMap;
use std::sync::Mutex;

struct CacheSlot {
    messages: Vec<Message>,
    last_used: u64,
}

/// LRU cache keyed by session id.
///
/// Thread-safe via `std::sync::Mutex` (non-async, held briefly).
pub struct HistoryCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    slots: HashMap<String, CacheSlot>,
    clock: u64,
}

impl HistoryCache {
    /// Create a cache holding at most `capacity` sessions (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner {
                slots: HashMap::new(),
                clock: 0,
            }),
        }
    }

    /// The cached history for a session, refreshing its recency.
    pub fn get(&self, session_id: &SessionId) -> Option<Vec<Message>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.clock += 1;
        let clock = inner.clock;
        let slot = inner.slots.get_mut(&session_id.0)?;
        slot.last_used = clock;
        Some(slot.messages.clone())
    }

    /// Insert or replace a session's history, evicting the least recently
    /// used session when at capacity.
    pub fn put(&self, session_id: &SessionId, messages: Vec<Message>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.clock += 1;
        let clock = inner.clock;

        if !inner.slots.contains_key(&session_id.0) && inner.slots.len() >= self.capacity {
            if let Some(oldest) = inner
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(key, _)| key.clone())
            {
                inner.slots.remove(&oldest);
            }
        }

        inner.slots.insert(
            session_id.0.clone(),
            CacheSlot {
                messages,
                last_used: clock,
            },
        );
    }

    /// Append a message to a cached session. A miss is a no-op — the next
    /// read will fall back to the store.
    pub fn append(&self, session_id: &SessionId, message: Message) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.clock += 1;
        let clock = inner.clock;
        if let Some(slot) = inner.slots.get_mut(&session_id.0) {
            slot.messages.push(message);
            slot.last_used = clock;
        }
    }

    /// Drop a session from the cache (e.g. after a failed append, when the
    /// cache can no longer be trusted to mirror the store).
    pub fn invalidate(&self, session_id: &SessionId) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.slots.remove(&session_id.0);
    }

    /// Number of cached sessions.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .slots
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
