//! Handshake, teardown and admission through the gateway

use super::lab::{data, segment, Lab, CLIENT, SERVER};
use ctrack::conntrack::{CtState, Direction, FlowKey, Verdict};
use ctrack::protocol::icmp::EchoBuilder;
use ctrack::protocol::ipv4::{PROTO_ICMP, PROTO_UDP};
use ctrack::protocol::tcp::TcpFlags;
use ctrack::protocol::udp::UdpDatagramBuilder;

/// SYN, SYN+ACK, ACK walk the flow to ESTABLISHED, each accepted
#[test]
fn test_three_way_handshake() {
    let lab = Lab::new();
    let key = FlowKey::tcp(CLIENT, SERVER);

    assert_eq!(
        lab.send("eth0", &segment(CLIENT, SERVER, TcpFlags::SYN), 0),
        Verdict::Accept
    );
    assert_eq!(lab.shared.lookup(&key).unwrap().state(), CtState::SynSent);

    assert_eq!(
        lab.send("eth1", &segment(SERVER, CLIENT, TcpFlags::SYN_ACK), 1),
        Verdict::Accept
    );
    assert_eq!(
        lab.shared.lookup(&key).unwrap().state(),
        CtState::SynReceived
    );

    assert_eq!(
        lab.send("eth0", &segment(CLIENT, SERVER, TcpFlags::ACK), 2),
        Verdict::Accept
    );
    assert_eq!(
        lab.shared.lookup(&key).unwrap().state(),
        CtState::Established
    );
    assert_eq!(lab.shared.drop_counter(), 0);
}

/// Both orientations of the tuple resolve to the same entry
#[test]
fn test_orientation_symmetry() {
    let lab = Lab::new();
    lab.handshake(CLIENT.1, 0);

    let forward = lab.shared.lookup(&FlowKey::tcp(CLIENT, SERVER)).unwrap();
    let backward = lab.shared.lookup(&FlowKey::tcp(SERVER, CLIENT)).unwrap();
    assert!(std::sync::Arc::ptr_eq(&forward, &backward));
    assert_eq!(*forward.origin(), FlowKey::tcp(CLIENT, SERVER));
    assert_eq!(lab.shared.size(), 1);
}

/// Every segment without a tracked flow that is not a SYN costs one drop
#[test]
fn test_admission_drop_count_is_exact() {
    let lab = Lab::new();

    for (i, flags) in [
        TcpFlags::ACK,
        TcpFlags::PSH_ACK,
        TcpFlags::FIN_ACK,
        TcpFlags::SYN_ACK,
        TcpFlags::NONE,
    ]
    .into_iter()
    .enumerate()
    {
        assert_eq!(
            lab.send("eth0", &segment(CLIENT, SERVER, flags), i as u64),
            Verdict::Drop,
            "{:?} without a flow must be dropped",
            flags
        );
        assert_eq!(lab.shared.drop_counter(), i as u64 + 1);
    }

    assert!(lab.shared.is_empty(), "dropped segments create no entries");
    assert_eq!(lab.counter("eth0.ip4.prerouting_dropped"), 5);
    assert_eq!(lab.counter("eth1.ip4.prerouting_dropped"), 0);
}

/// Orderly close from the client side, then a fresh connection on the tuple
#[test]
fn test_teardown_and_reuse() {
    let lab = Lab::new();
    lab.handshake(CLIENT.1, 0);
    assert_eq!(lab.send("eth0", &data(b"hello, server"), 10), Verdict::Accept);

    for (iface, packet) in [
        ("eth0", segment(CLIENT, SERVER, TcpFlags::FIN_ACK)),
        ("eth1", segment(SERVER, CLIENT, TcpFlags::FIN_ACK)),
        ("eth0", segment(CLIENT, SERVER, TcpFlags::ACK)),
    ] {
        assert_eq!(lab.send(iface, &packet, 20), Verdict::Accept);
    }

    let key = FlowKey::tcp(CLIENT, SERVER);
    let closed = lab.shared.lookup(&key).unwrap();
    assert_eq!(closed.state(), CtState::Closed);

    // a closed flow only admits FIN/ACK retransmits
    assert_eq!(
        lab.send("eth0", &segment(CLIENT, SERVER, TcpFlags::PSH), 30),
        Verdict::Drop
    );
    assert_eq!(
        lab.send("eth1", &segment(SERVER, CLIENT, TcpFlags::ACK), 30),
        Verdict::Accept
    );

    lab.handshake(CLIENT.1, 40);
    let reopened = lab.shared.lookup(&key).unwrap();
    assert_eq!(reopened.state(), CtState::Established);
    assert_eq!(reopened.counters(Direction::Original).packets, 2);
    assert_eq!(reopened.counters(Direction::Reply).packets, 1);
}

/// A reset tears the flow down at once
#[test]
fn test_rst_removes_flow() {
    let lab = Lab::new();
    lab.handshake(CLIENT.1, 0);

    assert_eq!(
        lab.send("eth1", &segment(SERVER, CLIENT, TcpFlags::RST), 5),
        Verdict::Accept
    );
    assert!(lab.shared.is_empty());
    assert_eq!(lab.send("eth0", &data(b"x"), 6), Verdict::Drop);
}

/// Counters follow the direction of each accepted segment
#[test]
fn test_per_direction_counters() {
    let lab = Lab::new();
    lab.handshake(CLIENT.1, 0);
    let payload = [0u8; 100];
    lab.send("eth0", &data(&payload), 1);

    let entry = lab.shared.lookup(&FlowKey::tcp(CLIENT, SERVER)).unwrap();
    let original = entry.counters(Direction::Original);
    assert_eq!(original.packets, 3);
    assert_eq!(original.bytes, 40 + 40 + 140);
    assert_eq!(entry.counters(Direction::Reply).packets, 1);
    assert_eq!(entry.last_seen().as_millis(), 1);
}

/// A ping through the gateway: request on eth0, reply on eth1
#[test]
fn test_ping_through_gateway() {
    let lab = Lab::new();
    let key = FlowKey::new(CLIENT.0, SERVER.0, 0x2a, 0, PROTO_ICMP);

    for seq in 0..3u16 {
        let request = EchoBuilder::request(CLIENT.0, SERVER.0, 0x2a).sequence(seq).build();
        let reply = EchoBuilder::reply(SERVER.0, CLIENT.0, 0x2a).sequence(seq).build();
        let t = 1_000 * seq as u64;
        assert_eq!(lab.send("eth0", &request, t), Verdict::Accept);
        assert_eq!(lab.send("eth1", &reply, t + 1), Verdict::Accept);
    }

    let entry = lab.shared.lookup(&key).unwrap();
    assert_eq!(entry.state(), CtState::Established);
    assert_eq!(entry.counters(Direction::Original).packets, 3);
    assert_eq!(entry.counters(Direction::Reply).packets, 3);
    assert_eq!(lab.counter("eth0.ip4.unclassified"), 0);
    assert_eq!(lab.shared.size(), 1);
}

/// A UDP exchange opens on the first datagram and is established by the answer
#[test]
fn test_udp_exchange() {
    let lab = Lab::new();
    let query = UdpDatagramBuilder::new(CLIENT, SERVER).payload(b"status?").build();
    let answer = UdpDatagramBuilder::new(SERVER, CLIENT).payload(b"ok").build();
    let key = FlowKey::new(CLIENT.0, SERVER.0, CLIENT.1, SERVER.1, PROTO_UDP);

    assert_eq!(lab.send("eth0", &query, 0), Verdict::Accept);
    assert_eq!(lab.shared.lookup(&key).unwrap().state(), CtState::New);

    assert_eq!(lab.send("eth1", &answer, 5), Verdict::Accept);
    assert_eq!(lab.shared.lookup(&key).unwrap().state(), CtState::Established);

    // a TCP flow on the same ports is a different flow
    assert_eq!(lab.send("eth0", &data(b"x"), 6), Verdict::Drop);
    assert_eq!(lab.shared.size(), 1);
}

/// Protocols the tracker does not follow are left to the unclassified policy
#[test]
fn test_unclassified_traffic() {
    use ctrack::protocol::ipv4::Ipv4Builder;

    let lab = Lab::new();
    let gre = Ipv4Builder::new()
        .protocol(47)
        .src_addr(CLIENT.0)
        .dst_addr(SERVER.0)
        .payload(&[0u8; 4])
        .build();

    assert_eq!(lab.send("eth0", &gre, 0), Verdict::Accept);
    assert_eq!(lab.counter("eth0.ip4.unclassified"), 1);
    assert_eq!(lab.shared.drop_counter(), 0);
    assert!(lab.shared.is_empty());
}
