//! Flow identity

use crate::protocol::ipv4::{PROTO_ICMP, PROTO_TCP, PROTO_UDP};
use std::fmt;
use std::net::Ipv4Addr;

/// Connection key (5-tuple)
///
/// A key carries an orientation (who is `src`). Two keys name the same flow
/// when they are equal either as-is or with one of them reversed; tables
/// store flows under [`FlowKey::canonical`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    /// IP protocol number
    pub protocol: u8,
}

impl FlowKey {
    pub fn new(
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        protocol: u8,
    ) -> Self {
        Self {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol,
        }
    }

    /// TCP key from `src` to `dst`
    pub fn tcp(src: (Ipv4Addr, u16), dst: (Ipv4Addr, u16)) -> Self {
        Self::new(src.0, dst.0, src.1, dst.1, PROTO_TCP)
    }

    /// Create the reverse key (swap src/dst)
    pub fn reverse(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            src_port: self.dst_port,
            dst_port: self.src_port,
            protocol: self.protocol,
        }
    }

    /// Whether this orientation is already the canonical one
    pub fn is_canonical(&self) -> bool {
        (self.src_ip, self.src_port) <= (self.dst_ip, self.dst_port)
    }

    /// Orientation-free form: the smaller `(addr, port)` endpoint is `src`
    pub fn canonical(&self) -> Self {
        if self.is_canonical() {
            *self
        } else {
            self.reverse()
        }
    }

    /// True if both keys name the same flow in any orientation
    pub fn same_flow(&self, other: &FlowKey) -> bool {
        self == other || *self == other.reverse()
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proto = match self.protocol {
            PROTO_TCP => "tcp",
            PROTO_UDP => "udp",
            PROTO_ICMP => "icmp",
            _ => "ip",
        };
        write!(
            f,
            "{} {}:{} -> {}:{}",
            proto, self.src_ip, self.src_port, self.dst_ip, self.dst_port
        )
    }
}

/// Direction of a packet relative to the flow's initiator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Sent by the endpoint that opened the flow
    Original,
    /// Sent by the peer
    Reply,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Original => Direction::Reply,
            Direction::Reply => Direction::Original,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Direction::Original => 0,
            Direction::Reply => 1,
        }
    }
}
