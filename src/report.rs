//! Decision reporting
//!
//! A [`Reporter`] receives every outcome of the decision engine, followed by a
//! dump of the flow table after each processed event.

use crate::dataplane::{FlowSnapshot, Outcome, Reason, Verdict};
use crate::Result;
use std::io::{self, Write};

/// Receiver of firewall decisions
///
/// Calls are synchronous and made from the event loop task, so a reporter
/// that blocks (such as [`ConsoleReporter`] on a stalled stdout pipe) also
/// holds up expiry sweeps and shutdown until the write completes.
pub trait Reporter {
    /// Report the outcome of one event
    fn report(&mut self, outcome: &Outcome) -> Result<()>;

    /// Report the full flow table
    fn flow_table(&mut self, flows: &[FlowSnapshot]) -> Result<()>;
}

const RULE: &str = "----------------------------------------";

/// Human-readable report written to any `Write`
pub struct ConsoleReporter<W> {
    out: W,
}

impl ConsoleReporter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Reporter for ConsoleReporter<W> {
    fn report(&mut self, outcome: &Outcome) -> Result<()> {
        match outcome {
            Outcome::Decision(decision) => {
                let action = match decision.verdict {
                    Verdict::Allow => "allowed",
                    Verdict::Deny if decision.is_drop() => "dropped",
                    Verdict::Deny => "denied",
                };
                writeln!(
                    self.out,
                    "Packet {}: {} ({})",
                    action,
                    decision.key,
                    label(decision.reason)
                )?;
            }
            Outcome::Closed(closures) => {
                for closure in closures {
                    writeln!(
                        self.out,
                        "Connection closed: {} -> {}",
                        closure.src, closure.dst
                    )?;
                }
            }
            Outcome::Ignored(_) => {}
        }
        Ok(())
    }

    fn flow_table(&mut self, flows: &[FlowSnapshot]) -> Result<()> {
        writeln!(self.out, "\nCurrent State Table:")?;
        writeln!(self.out, "{}", RULE)?;
        for flow in flows {
            writeln!(
                self.out,
                "Source: {}, Destination: {}:{}, State: {}",
                flow.key.src, flow.key.dst, flow.key.dst_port, flow.state
            )?;
        }
        writeln!(self.out, "{}", RULE)?;
        self.out.flush()?;
        Ok(())
    }
}

fn label(reason: Reason) -> &'static str {
    match reason {
        Reason::NewConnection => "New connection",
        Reason::PortNotAllowed => "Port not allowed",
        Reason::TableFull => "Flow table full",
        Reason::ConnectionEstablished => "Connection established",
        Reason::NoEstablishedConnection => "No established connection",
    }
}
