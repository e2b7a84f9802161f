//! Aging of idle flows and table capacity

use super::lab::{data, segment, Lab, CLIENT, SERVER};
use ctrack::conntrack::{
    ConnTrackTimeouts, CtState, Direction, FlowKey, TableConfig, Timestamp, Verdict,
};
use ctrack::protocol::ipv4::PROTO_UDP;
use ctrack::protocol::tcp::TcpFlags;
use ctrack::protocol::udp::UdpDatagramBuilder;
use std::time::Duration;

fn short_timeouts() -> TableConfig {
    TableConfig {
        max_entries: 8,
        timeouts: ConnTrackTimeouts {
            syn: Duration::from_secs(2),
            established: Duration::from_secs(30),
            closed_grace: Duration::from_secs(1),
            udp: Duration::from_secs(5),
            icmp: Duration::from_secs(3),
        },
        eviction_batch: 0,
    }
}

/// A half-open flow idle past the SYN timeout is forgotten; a new SYN then
/// starts from scratch
#[test]
fn test_syn_sent_expires() {
    let lab = Lab::with_config(short_timeouts());
    let syn = segment(CLIENT, SERVER, TcpFlags::SYN);
    lab.send("eth0", &syn, 0);
    lab.send("eth0", &syn, 500);

    assert_eq!(lab.gateway.run_aging(Timestamp::from_millis(2_500)), 0);
    assert_eq!(lab.gateway.run_aging(Timestamp::from_millis(2_501)), 1);
    assert!(lab.shared.is_empty());

    // the SYN+ACK of the forgotten attempt finds nothing
    assert_eq!(
        lab.send("eth1", &segment(SERVER, CLIENT, TcpFlags::SYN_ACK), 2_600),
        Verdict::Drop
    );

    assert_eq!(lab.send("eth0", &syn, 3_000), Verdict::Accept);
    let entry = lab.shared.lookup(&FlowKey::tcp(CLIENT, SERVER)).unwrap();
    assert_eq!(entry.state(), CtState::SynSent);
    assert_eq!(entry.counters(Direction::Original).packets, 1);
    assert_eq!(entry.counters(Direction::Reply).packets, 0);
    assert_eq!(entry.created().as_millis(), 3_000);
}

/// Established flows live as long as traffic keeps them fresh
#[test]
fn test_established_survives_while_active() {
    let lab = Lab::with_config(short_timeouts());
    lab.handshake(CLIENT.1, 0);

    for t in (10_000..=60_000).step_by(10_000) {
        assert_eq!(lab.send("eth0", &data(b"ping"), t), Verdict::Accept);
        assert_eq!(
            lab.gateway.run_aging(Timestamp::from_millis(t + 1)),
            0
        );
    }

    assert_eq!(
        lab.gateway.run_aging(Timestamp::from_millis(90_001)),
        1
    );
    assert_eq!(lab.send("eth0", &data(b"ping"), 90_002), Verdict::Drop);
}

/// Closed flows linger for the grace window only
#[test]
fn test_closed_grace_window() {
    let lab = Lab::with_config(short_timeouts());
    lab.handshake(CLIENT.1, 0);
    for (iface, packet) in [
        ("eth0", segment(CLIENT, SERVER, TcpFlags::FIN_ACK)),
        ("eth1", segment(SERVER, CLIENT, TcpFlags::FIN_ACK)),
        ("eth0", segment(CLIENT, SERVER, TcpFlags::ACK)),
    ] {
        lab.send(iface, &packet, 100);
    }

    // retransmitted final ACK within the grace window
    assert_eq!(
        lab.send("eth0", &segment(CLIENT, SERVER, TcpFlags::ACK), 600),
        Verdict::Accept
    );
    assert_eq!(
        lab.gateway.run_aging(Timestamp::from_millis(1_600)),
        0
    );
    assert_eq!(
        lab.gateway.run_aging(Timestamp::from_millis(1_601)),
        1
    );
}

/// Datagram flows age out on their own idle timeout, answered or not
#[test]
fn test_udp_flow_idles_out() {
    let lab = Lab::with_config(short_timeouts());
    let query = UdpDatagramBuilder::new(CLIENT, SERVER).build();
    let answer = UdpDatagramBuilder::new(SERVER, CLIENT).build();

    lab.send("eth0", &query, 0);
    lab.send("eth1", &answer, 1_000);
    let key = FlowKey::new(CLIENT.0, SERVER.0, CLIENT.1, SERVER.1, PROTO_UDP);
    assert_eq!(lab.shared.lookup(&key).unwrap().state(), CtState::Established);

    // 5s of silence since the answer, not the 30s established timeout
    assert_eq!(lab.gateway.run_aging(Timestamp::from_millis(6_000)), 0);
    assert_eq!(lab.gateway.run_aging(Timestamp::from_millis(6_001)), 1);

    // the late answer no longer has a flow; it opens a new one from the server
    assert_eq!(lab.send("eth1", &answer, 7_000), Verdict::Accept);
    let entry = lab.shared.lookup(&key).unwrap();
    assert_eq!(entry.state(), CtState::New);
    assert_eq!(*entry.origin(), key.reverse());
}

/// New flows beyond capacity are refused; tracked flows carry on
#[test]
fn test_capacity_limit() {
    let lab = Lab::with_config(short_timeouts());
    for port in 0..8 {
        lab.handshake(50000 + port, 0);
    }

    let extra = segment((CLIENT.0, 50100), SERVER, TcpFlags::SYN);
    assert_eq!(lab.send("eth0", &extra, 1), Verdict::Drop);
    assert_eq!(lab.shared.stats().refused.get(), 1);
    assert_eq!(lab.counter("conntrack.eth0.refused"), 1);
    assert_eq!(lab.shared.size(), 8);

    let tracked = segment((CLIENT.0, 50003), SERVER, TcpFlags::PSH_ACK);
    assert_eq!(lab.send("eth0", &tracked, 1), Verdict::Accept);
}
