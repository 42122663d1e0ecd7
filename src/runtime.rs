//! Event loop
//!
//! Pulls events from an [`EventSource`], runs them through the firewall and
//! hands every outcome plus a flow table dump to a [`Reporter`]. Idle flows
//! are swept on a timer between events.

use crate::dataplane::StatefulFirewall;
use crate::event::EventSource;
use crate::report::Reporter;
use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Counts for one run of the event loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Events processed by the firewall
    pub events: u64,
    /// Input records rejected before reaching the firewall
    pub invalid_input: u64,
    /// Flows removed by expiry sweeps
    pub expired: u64,
}

fn sweep_timer(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn next_sweep(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Run until the source is exhausted or `shutdown` completes
///
/// Invalid input records are logged and skipped; I/O errors from the source
/// or the reporter end the run. `source` must be cancel-safe.
pub async fn run<S, R, F>(
    firewall: &StatefulFirewall,
    source: &mut S,
    reporter: &mut R,
    sweep_interval: Option<Duration>,
    shutdown: F,
) -> Result<RunSummary>
where
    S: EventSource,
    R: Reporter,
    F: Future<Output = ()>,
{
    let mut summary = RunSummary::default();
    let mut sweep = sweep_interval.map(sweep_timer);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            _ = next_sweep(&mut sweep) => {
                let expired = firewall.run_maintenance();
                if expired > 0 {
                    debug!("Expired {} idle flows", expired);
                }
                summary.expired += expired as u64;
            }
            result = source.next_event() => {
                match result {
                    Ok(Some(event)) => {
                        let outcome = firewall.process(&event);
                        reporter.report(&outcome)?;
                        reporter.flow_table(&firewall.snapshot())?;
                        summary.events += 1;
                    }
                    Ok(None) => {
                        debug!("Event source exhausted");
                        break;
                    }
                    Err(Error::InvalidInput(msg)) => {
                        warn!("Rejected input: {}", msg);
                        firewall.metrics().invalid_input.inc();
                        summary.invalid_input += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    Ok(summary)
}
