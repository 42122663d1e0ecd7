//! Connection Tracking
//!
//! Maps flow keys to connection state. The table is shared between threads
//! and serialized by a single table-wide lock; every operation runs in
//! bounded time without I/O under the lock.
//!
//! Two operations on the same source/destination pair are linearized by that
//! lock. A `new` that reaches the table before a concurrent `close` is removed
//! and reported by it; one that arrives after the close survives.

use lru::LruCache;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default maximum number of tracked flows
pub const DEFAULT_MAX_ENTRIES: usize = 65_536;

/// Default idle timeout (5 minutes)
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Flow key (source, destination, destination port)
///
/// Directional: `a -> b:80` and `b -> a:80` are different flows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src: String,
    pub dst: String,
    pub dst_port: u16,
}

impl FlowKey {
    /// Create a new flow key
    pub fn new(src: impl Into<String>, dst: impl Into<String>, dst_port: u16) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            dst_port,
        }
    }

    /// Check if this flow belongs to the given source/destination pair
    pub fn matches_pair(&self, src: &str, dst: &str) -> bool {
        self.src == src && self.dst == dst
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}:{}", self.src, self.dst, self.dst_port)
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Admitted by policy and not yet closed
    Established,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowState::Established => f.write_str("established"),
        }
    }
}

/// What to do with a new flow when the table is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the least recently seen flow
    #[default]
    EvictOldest,
    /// Refuse the new flow
    Reject,
}

/// Capacity and expiry settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowTableConfig {
    /// Maximum number of entries (`None` = unbounded)
    pub max_entries: Option<usize>,
    /// Idle time after which an entry expires (`None` = never)
    pub idle_timeout: Option<Duration>,
    pub overflow: OverflowPolicy,
}

impl FlowTableConfig {
    /// No capacity bound and no expiry
    pub fn unbounded() -> Self {
        Self {
            max_entries: None,
            idle_timeout: None,
            overflow: OverflowPolicy::EvictOldest,
        }
    }
}

impl Default for FlowTableConfig {
    fn default() -> Self {
        Self {
            max_entries: Some(DEFAULT_MAX_ENTRIES),
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            overflow: OverflowPolicy::EvictOldest,
        }
    }
}

/// Result of [`FlowTable::insert_or_update`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New entry added
    Inserted,
    /// Existing entry overwritten
    Updated,
    /// New entry added after evicting the given flow
    Evicted(FlowKey),
    /// Table full, entry not added
    Rejected,
}

/// Point-in-time copy of one table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSnapshot {
    pub key: FlowKey,
    pub state: FlowState,
}

#[derive(Debug, Clone)]
struct FlowEntry {
    state: FlowState,
    /// Insertion sequence number, used for enumeration order
    seq: u64,
    last_seen: Instant,
}

/// Entries kept in recency order: refreshing an entry moves it to the front,
/// so `last_seen` never increases from the front towards the LRU end.
#[derive(Debug)]
struct Inner {
    entries: LruCache<FlowKey, FlowEntry>,
    next_seq: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            next_seq: 0,
        }
    }

    fn put(&mut self, key: FlowKey, state: FlowState, now: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.put(
            key,
            FlowEntry {
                state,
                seq,
                last_seen: now,
            },
        );
    }
}

fn into_table_order(mut keys: Vec<(u64, FlowKey)>) -> Vec<FlowKey> {
    keys.sort_unstable_by_key(|(seq, _)| *seq);
    keys.into_iter().map(|(_, key)| key).collect()
}

/// Connection tracking table
#[derive(Debug)]
pub struct FlowTable {
    inner: Mutex<Inner>,
    config: FlowTableConfig,
}

impl FlowTable {
    /// Create a table with default capacity and expiry
    pub fn new() -> Self {
        Self::with_config(FlowTableConfig::default())
    }

    /// Create a table with custom capacity and expiry
    pub fn with_config(mut config: FlowTableConfig) -> Self {
        config.max_entries = config.max_entries.filter(|&max| max > 0);
        Self {
            inner: Mutex::new(Inner::new()),
            config,
        }
    }

    /// Capacity and expiry settings in effect
    pub fn config(&self) -> &FlowTableConfig {
        &self.config
    }

    /// Maximum number of entries, if bounded
    pub fn capacity(&self) -> Option<usize> {
        self.config.max_entries
    }

    // The table only holds plain data and no critical section can leave it
    // half-updated, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &FlowEntry, now: Instant) -> bool {
        self.config
            .idle_timeout
            .is_some_and(|timeout| now.saturating_duration_since(entry.last_seen) > timeout)
    }

    /// Number of expired entries; they always sit at the LRU end
    fn expired_count(&self, inner: &Inner, now: Instant) -> usize {
        inner
            .entries
            .iter()
            .rev()
            .take_while(|(_, entry)| self.is_expired(entry, now))
            .count()
    }

    fn pop_expired(&self, inner: &mut Inner, now: Instant) -> Vec<(u64, FlowKey)> {
        let mut expired = Vec::new();
        while inner
            .entries
            .peek_lru()
            .is_some_and(|(_, entry)| self.is_expired(entry, now))
        {
            if let Some((key, entry)) = inner.entries.pop_lru() {
                expired.push((entry.seq, key));
            }
        }
        expired
    }

    /// Set the state of a flow, adding it if absent
    ///
    /// Overwriting a live entry keeps its position in the table and refreshes
    /// its idle timer. An expired entry is replaced as if it were absent.
    /// Capacity limits only apply to keys not yet present; expired entries
    /// are dropped before a full table evicts or rejects.
    pub fn insert_or_update(&self, key: FlowKey, state: FlowState) -> InsertOutcome {
        let mut inner = self.lock();
        // Taken under the lock so recency order matches `last_seen` order
        let now = Instant::now();

        match inner.entries.peek(&key).map(|entry| self.is_expired(entry, now)) {
            Some(false) => {
                if let Some(entry) = inner.entries.get_mut(&key) {
                    entry.state = state;
                    entry.last_seen = now;
                }
                return InsertOutcome::Updated;
            }
            Some(true) => {
                inner.entries.pop(&key);
            }
            None => {}
        }

        let mut evicted = None;
        if let Some(max) = self.config.max_entries {
            if inner.entries.len() >= max {
                let dropped = self.pop_expired(&mut inner, now);
                if !dropped.is_empty() {
                    debug!("Dropped {} idle flows from a full table", dropped.len());
                }
            }
            if inner.entries.len() >= max {
                match self.config.overflow {
                    OverflowPolicy::Reject => return InsertOutcome::Rejected,
                    OverflowPolicy::EvictOldest => {
                        evicted = inner.entries.pop_lru().map(|(oldest, _)| oldest);
                    }
                }
            }
        }

        inner.put(key, state, now);

        match evicted {
            Some(oldest) => InsertOutcome::Evicted(oldest),
            None => InsertOutcome::Inserted,
        }
    }

    /// Lookup the state of a flow
    ///
    /// Entries idle past the timeout are reported as absent.
    pub fn lookup(&self, key: &FlowKey) -> Option<FlowState> {
        let inner = self.lock();
        let now = Instant::now();
        inner
            .entries
            .peek(key)
            .filter(|entry| !self.is_expired(entry, now))
            .map(|entry| entry.state)
    }

    /// Lookup the state of a flow and refresh its idle timer
    pub fn touch(&self, key: &FlowKey) -> Option<FlowState> {
        let mut inner = self.lock();
        let now = Instant::now();
        let live = inner
            .entries
            .peek(key)
            .is_some_and(|entry| !self.is_expired(entry, now));
        if !live {
            return None;
        }
        let entry = inner.entries.get_mut(key)?;
        entry.last_seen = now;
        Some(entry.state)
    }

    /// Remove every live flow from `src` to `dst`, whatever the port
    ///
    /// Returns the removed keys in table order. Expired flows of the pair are
    /// left for [`expire_idle`](Self::expire_idle).
    pub fn remove_matching(&self, src: &str, dst: &str) -> Vec<FlowKey> {
        let mut inner = self.lock();
        let now = Instant::now();
        let matching: Vec<(u64, FlowKey)> = inner
            .entries
            .iter()
            .filter(|(key, entry)| key.matches_pair(src, dst) && !self.is_expired(entry, now))
            .map(|(key, entry)| (entry.seq, key.clone()))
            .collect();
        for (_, key) in &matching {
            inner.entries.pop(key);
        }
        drop(inner);

        into_table_order(matching)
    }

    /// Remove entries idle longer than the timeout
    ///
    /// Returns the removed keys in table order.
    pub fn expire_idle(&self, now: Instant) -> Vec<FlowKey> {
        if self.config.idle_timeout.is_none() {
            return Vec::new();
        }

        let mut inner = self.lock();
        let expired = self.pop_expired(&mut inner, now);
        drop(inner);

        into_table_order(expired)
    }

    /// Copy of all live entries in insertion order
    pub fn snapshot(&self) -> Vec<FlowSnapshot> {
        let inner = self.lock();
        let now = Instant::now();
        let mut entries: Vec<(u64, FlowSnapshot)> = inner
            .entries
            .iter()
            .filter(|(_, entry)| !self.is_expired(entry, now))
            .map(|(key, entry)| {
                (
                    entry.seq,
                    FlowSnapshot {
                        key: key.clone(),
                        state: entry.state,
                    },
                )
            })
            .collect();
        drop(inner);

        entries.sort_unstable_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, snap)| snap).collect()
    }

    /// Get number of live flows
    pub fn len(&self) -> usize {
        let inner = self.lock();
        let now = Instant::now();
        inner.entries.len() - self.expired_count(&inner, now)
    }

    /// Check if table has no live flows
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FlowTable {
    fn default() -> Self {
        Self::new()
    }
}
