//! End-to-end behaviour of the firewall: events in, decisions and table dumps out.

use statewall::dataplane::{
    FlowKey, FlowState, FlowTableConfig, OverflowPolicy, Outcome, Policy, Reason,
    StatefulFirewall, Verdict,
};
use statewall::event::{ConnectionTag, LineSource, PacketEvent};
use statewall::report::ConsoleReporter;
use statewall::runtime;
use std::sync::Arc;
use std::time::Duration;

fn firewall() -> StatefulFirewall {
    StatefulFirewall::new(Policy::new([80, 443]), FlowTableConfig::default())
}

fn process(fw: &StatefulFirewall, line: &str) -> Outcome {
    fw.process(&PacketEvent::parse_line(line).unwrap())
}

fn decision(outcome: Outcome) -> (Verdict, Reason) {
    match outcome {
        Outcome::Decision(d) => (d.verdict, d.reason),
        other => panic!("expected a decision, got {:?}", other),
    }
}

#[test]
fn test_reference_scenario() {
    let fw = firewall();

    assert_eq!(
        decision(process(&fw, "1.1.1.1 2.2.2.2 80 new")),
        (Verdict::Allow, Reason::NewConnection)
    );
    let table = fw.snapshot();
    assert_eq!(table.len(), 1);
    assert_eq!(table[0].key, FlowKey::new("1.1.1.1", "2.2.2.2", 80));
    assert_eq!(table[0].state, FlowState::Established);

    assert_eq!(
        decision(process(&fw, "1.1.1.1 2.2.2.2 80 established")),
        (Verdict::Allow, Reason::ConnectionEstablished)
    );

    assert_eq!(
        decision(process(&fw, "1.1.1.1 2.2.2.2 22 new")),
        (Verdict::Deny, Reason::PortNotAllowed)
    );
    assert_eq!(fw.connection_count(), 1);

    match process(&fw, "1.1.1.1 2.2.2.2 80 close") {
        Outcome::Closed(closures) => assert_eq!(closures.len(), 1),
        other => panic!("expected closures, got {:?}", other),
    }
    assert!(fw.snapshot().is_empty());

    assert_eq!(
        decision(process(&fw, "1.1.1.1 2.2.2.2 80 established")),
        (Verdict::Deny, Reason::NoEstablishedConnection)
    );
}

#[test]
fn test_new_then_established_for_every_allowed_port() {
    let fw = StatefulFirewall::new(Policy::new([22, 80, 443, 8080]), FlowTableConfig::default());

    for port in [22u16, 80, 443, 8080] {
        let new = format!("10.0.0.1 10.0.0.2 {} new", port);
        let est = format!("10.0.0.1 10.0.0.2 {} established", port);
        assert_eq!(decision(process(&fw, &new)).0, Verdict::Allow);
        assert_eq!(decision(process(&fw, &est)).0, Verdict::Allow);
    }

    assert_eq!(fw.connection_count(), 4);
    assert!(fw
        .snapshot()
        .iter()
        .all(|s| s.state == FlowState::Established));
}

#[test]
fn test_disallowed_ports_never_create_entries() {
    let fw = firewall();

    for port in [0u16, 21, 22, 8080, u16::MAX] {
        let line = format!("10.0.0.1 10.0.0.2 {} new", port);
        assert_eq!(decision(process(&fw, &line)).0, Verdict::Deny);
    }

    assert!(fw.snapshot().is_empty());
}

#[test]
fn test_repeated_new_is_idempotent() {
    let fw = firewall();

    process(&fw, "1.1.1.1 2.2.2.2 443 new");
    process(&fw, "1.1.1.1 2.2.2.2 443 new");

    let table = fw.snapshot();
    assert_eq!(table.len(), 1);
    assert_eq!(table[0].state, FlowState::Established);
}

#[test]
fn test_close_is_per_pair() {
    let fw = firewall();
    process(&fw, "1.1.1.1 2.2.2.2 80 new");
    process(&fw, "1.1.1.1 2.2.2.2 443 new");
    process(&fw, "2.2.2.2 1.1.1.1 80 new");

    process(&fw, "1.1.1.1 2.2.2.2 443 close");

    for line in ["1.1.1.1 2.2.2.2 80 established", "1.1.1.1 2.2.2.2 443 established"] {
        assert_eq!(
            decision(process(&fw, line)),
            (Verdict::Deny, Reason::NoEstablishedConnection)
        );
    }
    // The reverse direction is a different pair
    assert_eq!(
        decision(process(&fw, "2.2.2.2 1.1.1.1 80 established")).0,
        Verdict::Allow
    );
}

#[test]
fn test_expired_flows_are_gone_everywhere() {
    let idle = Duration::from_millis(100);
    let fw = StatefulFirewall::new(
        Policy::new([80, 443]),
        FlowTableConfig {
            max_entries: Some(1),
            idle_timeout: Some(idle),
            overflow: OverflowPolicy::Reject,
        },
    );
    process(&fw, "1.1.1.1 2.2.2.2 80 new");
    std::thread::sleep(idle * 2);

    assert_eq!(
        decision(process(&fw, "1.1.1.1 2.2.2.2 80 established")),
        (Verdict::Deny, Reason::NoEstablishedConnection)
    );
    assert!(fw.snapshot().is_empty());
    assert_eq!(fw.connection_count(), 0);

    match process(&fw, "1.1.1.1 2.2.2.2 80 close") {
        Outcome::Closed(closures) => assert!(closures.is_empty()),
        other => panic!("expected closures, got {:?}", other),
    }

    // The full table held only an expired flow
    assert_eq!(
        decision(process(&fw, "3.3.3.3 4.4.4.4 443 new")),
        (Verdict::Allow, Reason::NewConnection)
    );
    let table = fw.snapshot();
    assert_eq!(table.len(), 1);
    assert_eq!(table[0].key, FlowKey::new("3.3.3.3", "4.4.4.4", 443));
}

#[test]
fn test_concurrent_workers_share_one_table() {
    let fw = Arc::new(firewall());

    std::thread::scope(|s| {
        for worker in 0..4 {
            let fw = fw.clone();
            s.spawn(move || {
                for i in 0..100 {
                    let key = FlowKey::new(format!("10.{}.0.{}", worker, i), "192.0.2.1", 443);
                    fw.process(&PacketEvent::new(key.clone(), ConnectionTag::New));
                    fw.process(&PacketEvent::new(key, ConnectionTag::Established));
                }
            });
        }
    });

    assert_eq!(fw.connection_count(), 400);
    assert_eq!(fw.metrics().allowed.get(), 800);
    assert_eq!(fw.metrics().events.get(), 800);
}

#[tokio::test]
async fn test_console_transcript() {
    let fw = firewall();
    let input: &[u8] = b"1.1.1.1 2.2.2.2 80 new
1.1.1.1 2.2.2.2 22 new
1.1.1.1 2.2.2.2 80 close
";
    let mut source = LineSource::new(input);
    let mut reporter = ConsoleReporter::new(Vec::new());

    let summary = runtime::run(&fw, &mut source, &mut reporter, None, std::future::pending())
        .await
        .unwrap();
    assert_eq!(summary.events, 3);

    let rule = "-".repeat(40);
    let expected = format!(
        "Packet allowed: 1.1.1.1 -> 2.2.2.2:80 (New connection)

Current State Table:
{rule}
Source: 1.1.1.1, Destination: 2.2.2.2:80, State: established
{rule}
Packet denied: 1.1.1.1 -> 2.2.2.2:22 (Port not allowed)

Current State Table:
{rule}
Source: 1.1.1.1, Destination: 2.2.2.2:80, State: established
{rule}
Connection closed: 1.1.1.1 -> 2.2.2.2

Current State Table:
{rule}
{rule}
",
        rule = rule
    );
    assert_eq!(String::from_utf8(reporter.into_inner()).unwrap(), expected);
}
