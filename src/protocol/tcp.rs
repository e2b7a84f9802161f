//! TCP protocol - RFC 793
//!
//! Header parsing for classification and a segment builder for
//! synthesizing traffic.

use crate::{Error, Result};
use std::fmt;
use std::net::Ipv4Addr;

/// Minimum TCP header size (without options)
pub const MIN_HEADER_SIZE: usize = 20;

/// TCP control bits (byte 13 of the header)
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub const FIN: TcpFlags = TcpFlags(0x01);
    pub const SYN: TcpFlags = TcpFlags(0x02);
    pub const RST: TcpFlags = TcpFlags(0x04);
    pub const PSH: TcpFlags = TcpFlags(0x08);
    pub const ACK: TcpFlags = TcpFlags(0x10);
    pub const URG: TcpFlags = TcpFlags(0x20);

    pub const NONE: TcpFlags = TcpFlags(0);
    pub const SYN_ACK: TcpFlags = TcpFlags(0x12);
    pub const FIN_ACK: TcpFlags = TcpFlags(0x11);
    pub const PSH_ACK: TcpFlags = TcpFlags(0x18);

    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: TcpFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn syn(self) -> bool {
        self.contains(Self::SYN)
    }

    pub fn ack(self) -> bool {
        self.contains(Self::ACK)
    }

    pub fn fin(self) -> bool {
        self.contains(Self::FIN)
    }

    pub fn rst(self) -> bool {
        self.contains(Self::RST)
    }

    /// Connection request: SYN without ACK
    pub fn is_syn_only(self) -> bool {
        self.syn() && !self.ack()
    }

    pub fn is_syn_ack(self) -> bool {
        self.syn() && self.ack()
    }
}

impl std::ops::BitOr for TcpFlags {
    type Output = TcpFlags;

    fn bitor(self, rhs: TcpFlags) -> TcpFlags {
        TcpFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(TcpFlags, &str); 6] = [
            (TcpFlags::SYN, "SYN"),
            (TcpFlags::ACK, "ACK"),
            (TcpFlags::FIN, "FIN"),
            (TcpFlags::RST, "RST"),
            (TcpFlags::PSH, "PSH"),
            (TcpFlags::URG, "URG"),
        ];

        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();

        if set.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", set.join("|"))
        }
    }
}

/// Parsed TCP header (zero-copy reference)
#[derive(Debug)]
pub struct TcpHeader<'a> {
    buffer: &'a [u8],
    header_len: usize,
}

impl<'a> TcpHeader<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < MIN_HEADER_SIZE {
            return Err(Error::Parse("TCP header too short".into()));
        }

        let header_len = ((buffer[12] >> 4) as usize) * 4;

        if header_len < MIN_HEADER_SIZE {
            return Err(Error::Parse("TCP data offset too small".into()));
        }
        if buffer.len() < header_len {
            return Err(Error::Parse("TCP header truncated".into()));
        }

        Ok(Self { buffer, header_len })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[0], self.buffer[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn ack_num(&self) -> u32 {
        u32::from_be_bytes([
            self.buffer[8],
            self.buffer[9],
            self.buffer[10],
            self.buffer[11],
        ])
    }

    pub fn flags(&self) -> TcpFlags {
        TcpFlags::from_byte(self.buffer[13])
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[self.header_len..]
    }

    pub fn validate_checksum(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> bool {
        tcp_checksum(src_ip, dst_ip, self.buffer) == 0
    }
}

/// TCP checksum over the IPv4 pseudo-header and segment
pub fn tcp_checksum(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, segment: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    for pair in src_ip.octets().chunks(2).chain(dst_ip.octets().chunks(2)) {
        sum += u16::from_be_bytes([pair[0], pair[1]]) as u32;
    }
    sum += super::ipv4::PROTO_TCP as u32;
    sum += segment.len() as u32;

    for chunk in segment.chunks(2) {
        let word = match chunk {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [hi] => u16::from_be_bytes([*hi, 0]),
            _ => 0,
        };
        sum = sum.wrapping_add(word as u32);
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Builder for a TCP segment wrapped in an IPv4 packet
#[derive(Debug, Clone)]
pub struct TcpSegmentBuilder {
    src: (Ipv4Addr, u16),
    dst: (Ipv4Addr, u16),
    seq: u32,
    ack: u32,
    flags: TcpFlags,
    payload: Vec<u8>,
}

impl TcpSegmentBuilder {
    pub fn new(src: (Ipv4Addr, u16), dst: (Ipv4Addr, u16)) -> Self {
        Self {
            src,
            dst,
            seq: 0,
            ack: 0,
            flags: TcpFlags::NONE,
            payload: Vec::new(),
        }
    }

    pub fn flags(mut self, flags: TcpFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    pub fn ack_num(mut self, ack: u32) -> Self {
        self.ack = ack;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    /// Raw TCP segment with a valid checksum
    pub fn build_segment(&self) -> Vec<u8> {
        let mut seg = Vec::with_capacity(MIN_HEADER_SIZE + self.payload.len());
        seg.extend_from_slice(&self.src.1.to_be_bytes());
        seg.extend_from_slice(&self.dst.1.to_be_bytes());
        seg.extend_from_slice(&self.seq.to_be_bytes());
        seg.extend_from_slice(&self.ack.to_be_bytes());
        seg.push(0x50);
        seg.push(self.flags.bits());
        seg.extend_from_slice(&0xffffu16.to_be_bytes()); // window
        seg.extend_from_slice(&[0, 0, 0, 0]);
        seg.extend_from_slice(&self.payload);

        let sum = tcp_checksum(self.src.0, self.dst.0, &seg);
        seg[16..18].copy_from_slice(&sum.to_be_bytes());
        seg
    }

    /// Complete IPv4 packet carrying the segment
    pub fn build(&self) -> Vec<u8> {
        super::ipv4::Ipv4Builder::new()
            .src_addr(self.src.0)
            .dst_addr(self.dst.0)
            .protocol(super::ipv4::PROTO_TCP)
            .payload(&self.build_segment())
            .build()
    }
}
