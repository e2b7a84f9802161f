//! Test bench: a two-NIC gateway and the packets of one client/server pair

use ctrack::conntrack::{ConnTrackTable, TableConfig, Timestamp, Verdict};
use ctrack::dataplane::{Gateway, UnclassifiedPolicy};
use ctrack::protocol::tcp::{TcpFlags, TcpSegmentBuilder};
use std::net::Ipv4Addr;
use std::sync::Arc;

pub const CLIENT: (Ipv4Addr, u16) = (Ipv4Addr::new(10, 0, 2, 10), 40000);
pub const SERVER: (Ipv4Addr, u16) = (Ipv4Addr::new(10, 0, 1, 10), 6666);

/// Gateway with eth0 and eth1 sharing one table
pub struct Lab {
    pub gateway: Gateway,
    pub shared: Arc<ConnTrackTable>,
}

impl Lab {
    pub fn new() -> Self {
        Self::with_config(TableConfig::default())
    }

    pub fn with_config(config: TableConfig) -> Self {
        let mut gateway = Gateway::new(config, UnclassifiedPolicy::Accept);
        let shared = gateway.new_table();
        gateway
            .add_interface("eth0", shared.clone())
            .expect("eth0 registers");
        gateway
            .add_interface("eth1", shared.clone())
            .expect("eth1 registers");
        Self { gateway, shared }
    }

    /// Feed `packet` to `iface` at `t` milliseconds
    pub fn send(&self, iface: &str, packet: &[u8], t: u64) -> Verdict {
        self.gateway
            .process_packet_at(iface, packet, Timestamp::from_millis(t))
            .expect("interface exists")
    }

    /// Client SYN, server SYN+ACK, client ACK; every step must be accepted
    pub fn handshake(&self, client_port: u16, t: u64) {
        let client = (CLIENT.0, client_port);
        for (iface, packet) in [
            ("eth0", segment(client, SERVER, TcpFlags::SYN)),
            ("eth1", segment(SERVER, client, TcpFlags::SYN_ACK)),
            ("eth0", segment(client, SERVER, TcpFlags::ACK)),
        ] {
            assert_eq!(
                self.send(iface, &packet, t),
                Verdict::Accept,
                "handshake step on {} should be accepted",
                iface
            );
        }
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.gateway
            .export_metrics()
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .unwrap_or_else(|| panic!("no metric named {}", name))
    }
}

/// IPv4 packet carrying a TCP segment
pub fn segment(src: (Ipv4Addr, u16), dst: (Ipv4Addr, u16), flags: TcpFlags) -> Vec<u8> {
    TcpSegmentBuilder::new(src, dst).flags(flags).build()
}

/// Client-to-server data segment
pub fn data(payload: &[u8]) -> Vec<u8> {
    TcpSegmentBuilder::new(CLIENT, SERVER)
        .flags(TcpFlags::PSH_ACK)
        .payload(payload)
        .build()
}
