//! Statewall - Connection Tracking Firewall
//!
//! A stateful firewall core: packet events are checked against a port
//! admission policy and a concurrent flow table, producing allow/deny
//! decisions and tracking connections until they are closed or expire.

pub mod config;
pub mod dataplane;
pub mod error;
pub mod event;
pub mod report;
pub mod runtime;
pub mod telemetry;

pub use error::{Error, Result};
