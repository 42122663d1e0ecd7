//! Stateful Firewall decision engine
//!
//! Turns packet events into allow/deny decisions and drives the flow table:
//! - `new` opens a flow if the destination port is admitted by policy
//! - `established` is allowed only for an open flow
//! - `close` removes every flow between the source and destination

use super::conntrack::{
    FlowKey, FlowSnapshot, FlowState, FlowTable, FlowTableConfig, InsertOutcome,
};
use super::policy::{is_port_allowed, Policy};
use crate::event::{ConnectionTag, PacketEvent};
use crate::telemetry::MetricsRegistry;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Firewall verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Allow the packet
    Allow,
    /// Deny or drop the packet
    Deny,
}

/// Why a verdict was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    NewConnection,
    PortNotAllowed,
    TableFull,
    ConnectionEstablished,
    NoEstablishedConnection,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::NewConnection => "new connection established",
            Reason::PortNotAllowed => "port not allowed",
            Reason::TableFull => "flow table full",
            Reason::ConnectionEstablished => "connection established",
            Reason::NoEstablishedConnection => "no established connection",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision for a `new` or `established` packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub key: FlowKey,
    pub verdict: Verdict,
    pub reason: Reason,
}

impl Decision {
    fn new(key: &FlowKey, verdict: Verdict, reason: Reason) -> Self {
        Self {
            key: key.clone(),
            verdict,
            reason,
        }
    }

    /// A denied packet of a flow that is not (or no longer) tracked
    pub fn is_drop(&self) -> bool {
        self.reason == Reason::NoEstablishedConnection
    }
}

/// One flow removed by a `close` event
///
/// Carries no port: closing a pair closes all of its ports together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Closure {
    pub src: String,
    pub dst: String,
}

/// Result of processing one packet event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Decision(Decision),
    /// One entry per removed flow (empty if nothing was tracked)
    Closed(Vec<Closure>),
    /// Unrecognized connection-state tag, no transition
    Ignored(String),
}

/// Stateful firewall
///
/// Process-scoped context holding the flow table, the admission policy and
/// the counters. Shared by reference between the event loop and any workers.
#[derive(Debug)]
pub struct StatefulFirewall {
    /// Connection tracking table
    flows: FlowTable,
    /// Admitted destination ports, replaced as a whole on reload
    policy: RwLock<Arc<Policy>>,
    metrics: Arc<MetricsRegistry>,
}

impl StatefulFirewall {
    /// Create a new stateful firewall
    pub fn new(policy: Policy, table: FlowTableConfig) -> Self {
        Self::with_metrics(policy, table, Arc::new(MetricsRegistry::new()))
    }

    /// Create a firewall reporting into an existing metrics registry
    pub fn with_metrics(
        policy: Policy,
        table: FlowTableConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            flows: FlowTable::with_config(table),
            policy: RwLock::new(Arc::new(policy)),
            metrics,
        }
    }

    /// Current policy
    pub fn policy(&self) -> Arc<Policy> {
        self.policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the policy for subsequent events
    ///
    /// Flows admitted under the previous policy stay open.
    pub fn reload_policy(&self, policy: Policy) {
        info!(
            "Policy reloaded: allowed ports {:?}",
            policy.ports().collect::<Vec<_>>()
        );
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(policy);
    }

    /// Get the connection tracking table
    pub fn flow_table(&self) -> &FlowTable {
        &self.flows
    }

    /// Get the metrics registry
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Process one packet event
    pub fn process(&self, event: &PacketEvent) -> Outcome {
        self.metrics.events.inc();

        let outcome = match &event.tag {
            ConnectionTag::New => Outcome::Decision(self.handle_new_connection(&event.key)),
            ConnectionTag::Established => Outcome::Decision(self.allow_packet(&event.key)),
            ConnectionTag::Close => {
                Outcome::Closed(self.close_connection(&event.key.src, &event.key.dst))
            }
            ConnectionTag::Unrecognized(tag) => {
                debug!("Ignoring packet {} with unknown state {:?}", event.key, tag);
                self.metrics.ignored.inc();
                Outcome::Ignored(tag.clone())
            }
        };

        self.metrics.set_flow_table_size(self.flows.len());
        outcome
    }

    /// Admit a new connection if its destination port is allowed
    fn handle_new_connection(&self, key: &FlowKey) -> Decision {
        let policy = self.policy();

        if !is_port_allowed(key.dst_port, &policy) {
            info!("Connection attempt denied: {}", key);
            self.metrics.denied.inc();
            return Decision::new(key, Verdict::Deny, Reason::PortNotAllowed);
        }

        match self.flows.insert_or_update(key.clone(), FlowState::Established) {
            InsertOutcome::Rejected => {
                warn!("Connection attempt denied: {} (flow table full)", key);
                self.metrics.rejected.inc();
                self.metrics.denied.inc();
                return Decision::new(key, Verdict::Deny, Reason::TableFull);
            }
            InsertOutcome::Evicted(oldest) => {
                warn!("Flow table full, evicted {}", oldest);
                self.metrics.evicted.inc();
            }
            InsertOutcome::Inserted | InsertOutcome::Updated => {}
        }

        info!("New connection established: {}", key);
        self.metrics.allowed.inc();
        Decision::new(key, Verdict::Allow, Reason::NewConnection)
    }

    /// Allow a packet only if its flow is established
    fn allow_packet(&self, key: &FlowKey) -> Decision {
        if self.flows.touch(key) == Some(FlowState::Established) {
            info!("Packet allowed: {}", key);
            self.metrics.allowed.inc();
            Decision::new(key, Verdict::Allow, Reason::ConnectionEstablished)
        } else {
            info!("Packet dropped: {} (No established connection)", key);
            self.metrics.dropped.inc();
            Decision::new(key, Verdict::Deny, Reason::NoEstablishedConnection)
        }
    }

    /// Close every flow from `src` to `dst`
    fn close_connection(&self, src: &str, dst: &str) -> Vec<Closure> {
        self.flows
            .remove_matching(src, dst)
            .into_iter()
            .map(|key| {
                info!("Connection closed: {} -> {}", key.src, key.dst);
                self.metrics.closed.inc();
                Closure {
                    src: key.src,
                    dst: key.dst,
                }
            })
            .collect()
    }

    /// Ordered copy of the flow table
    pub fn snapshot(&self) -> Vec<FlowSnapshot> {
        self.flows.snapshot()
    }

    /// Run maintenance (expire idle flows)
    ///
    /// Returns the number of flows removed.
    pub fn run_maintenance(&self) -> usize {
        let expired = self.flows.expire_idle(Instant::now());
        for key in &expired {
            debug!("Connection expired: {}", key);
        }
        self.metrics.expired.add(expired.len() as u64);
        self.metrics.set_flow_table_size(self.flows.len());
        expired.len()
    }

    /// Get number of tracked connections
    pub fn connection_count(&self) -> usize {
        self.flows.len()
    }
}

impl Default for StatefulFirewall {
    fn default() -> Self {
        Self::new(Policy::default(), FlowTableConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::OverflowPolicy;
    use std::time::Duration;

    const SRC: &str = "1.1.1.1";
    const DST: &str = "2.2.2.2";

    fn event(port: u16, tag: ConnectionTag) -> PacketEvent {
        PacketEvent::new(FlowKey::new(SRC, DST, port), tag)
    }

    fn verdict(outcome: Outcome) -> (Verdict, Reason) {
        match outcome {
            Outcome::Decision(d) => (d.verdict, d.reason),
            other => panic!("expected a decision, got {:?}", other),
        }
    }

    #[test]
    fn test_new_allowed_port() {
        let fw = StatefulFirewall::default();

        let outcome = fw.process(&event(80, ConnectionTag::New));

        assert_eq!(verdict(outcome), (Verdict::Allow, Reason::NewConnection));
        assert_eq!(
            fw.flow_table().lookup(&FlowKey::new(SRC, DST, 80)),
            Some(FlowState::Established)
        );
    }

    #[test]
    fn test_new_disallowed_port() {
        let fw = StatefulFirewall::default();

        let outcome = fw.process(&event(22, ConnectionTag::New));

        assert_eq!(verdict(outcome), (Verdict::Deny, Reason::PortNotAllowed));
        assert_eq!(fw.connection_count(), 0);
    }

    #[test]
    fn test_established_without_new_dropped() {
        let fw = StatefulFirewall::default();

        let outcome = fw.process(&event(80, ConnectionTag::Established));

        match outcome {
            Outcome::Decision(d) => {
                assert_eq!(d.verdict, Verdict::Deny);
                assert!(d.is_drop());
            }
            other => panic!("expected a decision, got {:?}", other),
        }
        assert_eq!(fw.connection_count(), 0);
    }

    #[test]
    fn test_established_after_new() {
        let fw = StatefulFirewall::default();
        fw.process(&event(443, ConnectionTag::New));

        let outcome = fw.process(&event(443, ConnectionTag::Established));

        assert_eq!(
            verdict(outcome),
            (Verdict::Allow, Reason::ConnectionEstablished)
        );
        assert_eq!(fw.connection_count(), 1);
    }

    #[test]
    fn test_close_removes_all_ports() {
        let fw = StatefulFirewall::default();
        fw.process(&event(80, ConnectionTag::New));
        fw.process(&event(443, ConnectionTag::New));
        fw.process(&PacketEvent::new(
            FlowKey::new(SRC, "3.3.3.3", 80),
            ConnectionTag::New,
        ));

        // Port in a close event is irrelevant
        let outcome = fw.process(&event(9999, ConnectionTag::Close));

        let closure = Closure {
            src: SRC.to_string(),
            dst: DST.to_string(),
        };
        assert_eq!(outcome, Outcome::Closed(vec![closure.clone(), closure]));
        assert_eq!(fw.connection_count(), 1);
        for port in [80, 443] {
            assert_eq!(
                verdict(fw.process(&event(port, ConnectionTag::Established))),
                (Verdict::Deny, Reason::NoEstablishedConnection)
            );
        }
    }

    #[test]
    fn test_close_without_flows() {
        let fw = StatefulFirewall::default();
        assert_eq!(
            fw.process(&event(80, ConnectionTag::Close)),
            Outcome::Closed(Vec::new())
        );
    }

    #[test]
    fn test_unrecognized_tag_ignored() {
        let fw = StatefulFirewall::default();
        fw.process(&event(80, ConnectionTag::New));

        let outcome = fw.process(&event(80, ConnectionTag::Unrecognized("reset".into())));

        assert_eq!(outcome, Outcome::Ignored("reset".to_string()));
        assert_eq!(fw.connection_count(), 1);
        assert_eq!(fw.metrics().ignored.get(), 1);
    }

    #[test]
    fn test_table_full_rejects() {
        let fw = StatefulFirewall::new(
            Policy::default(),
            FlowTableConfig {
                max_entries: Some(1),
                idle_timeout: None,
                overflow: OverflowPolicy::Reject,
            },
        );
        fw.process(&event(80, ConnectionTag::New));

        let outcome = fw.process(&event(443, ConnectionTag::New));

        assert_eq!(verdict(outcome), (Verdict::Deny, Reason::TableFull));
        assert_eq!(fw.metrics().rejected.get(), 1);
    }

    #[test]
    fn test_table_full_evicts() {
        let fw = StatefulFirewall::new(
            Policy::default(),
            FlowTableConfig {
                max_entries: Some(1),
                idle_timeout: None,
                overflow: OverflowPolicy::EvictOldest,
            },
        );
        fw.process(&event(80, ConnectionTag::New));

        let outcome = fw.process(&event(443, ConnectionTag::New));

        assert_eq!(verdict(outcome), (Verdict::Allow, Reason::NewConnection));
        assert_eq!(fw.metrics().evicted.get(), 1);
        assert_eq!(
            verdict(fw.process(&event(80, ConnectionTag::Established))),
            (Verdict::Deny, Reason::NoEstablishedConnection)
        );
    }

    #[test]
    fn test_reload_policy() {
        let fw = StatefulFirewall::default();
        fw.process(&event(80, ConnectionTag::New));

        fw.reload_policy(Policy::new([22]));

        assert_eq!(
            verdict(fw.process(&event(22, ConnectionTag::New))),
            (Verdict::Allow, Reason::NewConnection)
        );
        assert_eq!(
            verdict(fw.process(&event(443, ConnectionTag::New))),
            (Verdict::Deny, Reason::PortNotAllowed)
        );
        // Existing flows survive the reload
        assert_eq!(
            verdict(fw.process(&event(80, ConnectionTag::Established))),
            (Verdict::Allow, Reason::ConnectionEstablished)
        );
    }

    #[test]
    fn test_run_maintenance() {
        let fw = StatefulFirewall::new(
            Policy::default(),
            FlowTableConfig {
                max_entries: None,
                idle_timeout: Some(Duration::from_millis(1)),
                overflow: OverflowPolicy::EvictOldest,
            },
        );
        fw.process(&event(80, ConnectionTag::New));

        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(fw.run_maintenance(), 1);
        assert_eq!(fw.connection_count(), 0);
        assert_eq!(fw.metrics().expired.get(), 1);
    }

    #[test]
    fn test_metrics_counted() {
        let fw = StatefulFirewall::default();
        fw.process(&event(80, ConnectionTag::New));
        fw.process(&event(22, ConnectionTag::New));
        fw.process(&event(80, ConnectionTag::Established));
        fw.process(&event(443, ConnectionTag::Established));
        fw.process(&event(80, ConnectionTag::Close));

        let m = fw.metrics();
        assert_eq!(m.events.get(), 5);
        assert_eq!(m.allowed.get(), 2);
        assert_eq!(m.denied.get(), 1);
        assert_eq!(m.dropped.get(), 1);
        assert_eq!(m.closed.get(), 1);
        assert_eq!(m.flow_table_size(), 0);
    }
}
