//! Data plane components
//!
//! Connection tracking, admission policy and the decision engine.

mod conntrack;
mod firewall;
mod policy;

pub use conntrack::{
    FlowKey, FlowSnapshot, FlowState, FlowTable, FlowTableConfig, InsertOutcome, OverflowPolicy,
    DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_ENTRIES,
};
pub use firewall::{Closure, Decision, Outcome, Reason, StatefulFirewall, Verdict};
pub use policy::{is_port_allowed, Policy, DEFAULT_ALLOWED_PORTS};
