//! Snapshot, table swap and restore while the gateway stays up

use super::lab::{data, segment, Lab, CLIENT, SERVER};
use ctrack::conntrack::{snapshot, ConnTrackTable, CtState, FlowKey, TableConfig, Verdict};
use ctrack::protocol::tcp::TcpFlags;
use ctrack::Error;
use std::sync::Arc;

/// Break established connections by swapping in an empty table, then bring
/// them back from a snapshot
///
/// ```text
/// handshake -> serialize -> swap(eth0, eth1) -> 10 x data (dropped)
///           -> restore into the current table -> data (accepted)
/// ```
#[test]
fn test_break_and_resurrect_connections() {
    let lab = Lab::new();
    lab.handshake(CLIENT.1, 0);
    assert_eq!(lab.send("eth0", &data(b"hello"), 1), Verdict::Accept);

    let mut storage = Vec::new();
    snapshot::serialize_to(&lab.shared, &mut storage);

    let fresh = Arc::new(ConnTrackTable::new());
    let displaced = lab
        .gateway
        .swap_tables(&["eth0", "eth1"], fresh.clone())
        .unwrap();
    assert!(displaced.iter().all(|t| Arc::ptr_eq(t, &lab.shared)));

    let dropped_before = lab.counter("eth0.ip4.prerouting_dropped");
    for i in 0..10 {
        assert_eq!(
            lab.send("eth0", &data(b"are you there?"), 100 + i),
            Verdict::Drop,
            "segment {} of a broken connection should be dropped",
            i
        );
    }
    assert_eq!(fresh.drop_counter(), 10);
    assert_eq!(lab.counter("eth0.ip4.prerouting_dropped") - dropped_before, 10);
    assert!(fresh.is_empty());

    assert_eq!(lab.gateway.restore("eth0", &storage).unwrap(), 1);
    assert_eq!(lab.send("eth0", &data(b"back again"), 3000), Verdict::Accept);
    assert_eq!(
        fresh.lookup(&FlowKey::tcp(CLIENT, SERVER)).unwrap().state(),
        CtState::Established
    );
}

/// Swapping one interface leaves the other on the shared table
#[test]
fn test_swap_is_isolated_per_interface() {
    let lab = Lab::new();
    lab.handshake(CLIENT.1, 0);

    let fresh = lab.gateway.new_table();
    lab.gateway.swap_tables(&["eth0"], fresh.clone()).unwrap();

    assert!(Arc::ptr_eq(&lab.gateway.table("eth0").unwrap(), &fresh));
    assert!(Arc::ptr_eq(&lab.gateway.table("eth1").unwrap(), &lab.shared));

    // replies still cross eth1, client data no longer crosses eth0
    let reply = segment(SERVER, CLIENT, TcpFlags::PSH_ACK);
    assert_eq!(lab.send("eth1", &reply, 10), Verdict::Accept);
    assert_eq!(lab.send("eth0", &data(b"x"), 10), Verdict::Drop);
    assert_eq!(lab.shared.drop_counter(), 0);
    assert_eq!(fresh.drop_counter(), 1);
}

/// Putting the displaced table back restores the old flows as they were
#[test]
fn test_swap_back_displaced_table() {
    let lab = Lab::new();
    lab.handshake(CLIENT.1, 0);

    let displaced = lab
        .gateway
        .swap_tables(&["eth0", "eth1"], lab.gateway.new_table())
        .unwrap();
    assert_eq!(lab.send("eth0", &data(b"x"), 5), Verdict::Drop);

    lab.gateway
        .swap_tables(&["eth0", "eth1"], displaced[0].clone())
        .unwrap();
    assert_eq!(lab.send("eth0", &data(b"x"), 6), Verdict::Accept);
}

/// A restored table carries the same flows, states and counters
#[test]
fn test_snapshot_round_trip_through_table() {
    let lab = Lab::new();
    for port in 40000..40010 {
        lab.handshake(port, 0);
    }
    lab.send(
        "eth0",
        &segment((CLIENT.0, 40003), SERVER, TcpFlags::SYN),
        0,
    );

    let bytes = lab.gateway.snapshot("eth0").unwrap();
    let restored = ConnTrackTable::restore(&bytes, TableConfig::default()).unwrap();

    let mut before = lab.shared.entries();
    let mut after = restored.entries();
    before.sort_by_key(|v| v.origin.src_port);
    after.sort_by_key(|v| v.origin.src_port);
    assert_eq!(before, after);
}

/// Damaged snapshots are rejected and change nothing
#[test]
fn test_restore_rejects_corrupt_snapshot() {
    let lab = Lab::new();
    lab.handshake(CLIENT.1, 0);
    let mut bytes = lab.gateway.snapshot("eth0").unwrap();

    let fresh = lab.gateway.new_table();
    lab.gateway.swap_tables(&["eth0"], fresh.clone()).unwrap();

    bytes[0] = b'X';
    let err = lab.gateway.restore("eth0", &bytes).unwrap_err();
    assert!(matches!(err, Error::CorruptSnapshot(_)));
    assert!(fresh.is_empty());

    let err = lab.gateway.restore("eth0", &[]).unwrap_err();
    assert!(matches!(err, Error::CorruptSnapshot(_)));
}

/// Packets keep flowing on other threads while tables are swapped
#[test]
fn test_swap_under_traffic() {
    let lab = Arc::new(Lab::new());
    lab.handshake(CLIENT.1, 0);

    let senders: Vec<_> = (0..4)
        .map(|_| {
            let lab = lab.clone();
            std::thread::spawn(move || {
                let packet = segment(SERVER, CLIENT, TcpFlags::ACK);
                for t in 0..500 {
                    lab.send("eth1", &packet, t);
                }
            })
        })
        .collect();

    for _ in 0..50 {
        let displaced = lab
            .gateway
            .swap_tables(&["eth0"], lab.gateway.new_table())
            .unwrap();
        assert_eq!(displaced.len(), 1);
    }
    for s in senders {
        s.join().unwrap();
    }

    // eth1 never left the shared table, so its flow never broke
    assert_eq!(lab.shared.drop_counter(), 0);
    assert_eq!(lab.shared.size(), 1);
}
