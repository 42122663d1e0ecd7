//! Metrics collection for firewall decisions.
//!
//! Provides thread-safe counters for decisions and flow table activity.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds a value to the counter.
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Gets the current value of the counter.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Metrics registry for the firewall.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Number of packet events processed.
    pub events: Counter,
    /// Number of input lines rejected before reaching the engine.
    pub invalid_input: Counter,

    // Decision metrics
    /// Number of packets allowed (new or established).
    pub allowed: Counter,
    /// Number of new connections denied.
    pub denied: Counter,
    /// Number of packets dropped for lack of an established flow.
    pub dropped: Counter,
    /// Number of flows removed by close events.
    pub closed: Counter,
    /// Number of events with an unrecognized state tag.
    pub ignored: Counter,

    // Flow table metrics
    /// Number of flows evicted to make room.
    pub evicted: Counter,
    /// Number of flows removed by idle expiry.
    pub expired: Counter,
    /// Number of new flows refused because the table was full.
    pub rejected: Counter,

    /// Current number of flow table entries.
    flow_table_size: AtomicU64,
}

impl MetricsRegistry {
    /// Creates a new metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the flow table size gauge.
    pub fn set_flow_table_size(&self, size: usize) {
        self.flow_table_size.store(size as u64, Ordering::Relaxed);
    }

    pub fn flow_table_size(&self) -> u64 {
        self.flow_table_size.load(Ordering::Relaxed)
    }

    /// Exports all metrics as key-value pairs.
    pub fn export(&self) -> Vec<(String, u64)> {
        vec![
            ("events".into(), self.events.get()),
            ("invalid_input".into(), self.invalid_input.get()),
            ("allowed".into(), self.allowed.get()),
            ("denied".into(), self.denied.get()),
            ("dropped".into(), self.dropped.get()),
            ("closed".into(), self.closed.get()),
            ("ignored".into(), self.ignored.get()),
            ("evicted".into(), self.evicted.get()),
            ("expired".into(), self.expired.get()),
            ("rejected".into(), self.rejected.get()),
            ("flow_table_size".into(), self.flow_table_size()),
        ]
    }
}
