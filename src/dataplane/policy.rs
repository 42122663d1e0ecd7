//! Static admission policy
//!
//! A policy is the set of destination ports that may open new connections.

use std::collections::BTreeSet;

/// Ports admitted when no configuration is supplied (HTTP and HTTPS)
pub const DEFAULT_ALLOWED_PORTS: [u16; 2] = [80, 443];

/// Set of admitted destination ports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    allowed_ports: BTreeSet<u16>,
}

impl Policy {
    /// Create a policy from a list of admitted ports
    pub fn new(ports: impl IntoIterator<Item = u16>) -> Self {
        Self {
            allowed_ports: ports.into_iter().collect(),
        }
    }

    /// Check if a destination port is admitted
    pub fn allows(&self, port: u16) -> bool {
        self.allowed_ports.contains(&port)
    }

    /// Admitted ports in ascending order
    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.allowed_ports.iter().copied()
    }

    /// Number of admitted ports
    pub fn len(&self) -> usize {
        self.allowed_ports.len()
    }

    /// Check if no port is admitted
    pub fn is_empty(&self) -> bool {
        self.allowed_ports.is_empty()
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_PORTS)
    }
}

/// Check a destination port against the policy
pub fn is_port_allowed(port: u16, policy: &Policy) -> bool {
    policy.allows(port)
}
