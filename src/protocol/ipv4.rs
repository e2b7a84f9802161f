//! IPv4 protocol - RFC 791
//!
//! Only what the prerouting hook needs: header access for classification
//! and a builder used to synthesize packets.

use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Minimum IPv4 header size (without options)
pub const MIN_HEADER_SIZE: usize = 20;

/// IP protocol number for TCP
pub const PROTO_TCP: u8 = 6;

/// IP protocol number for UDP
pub const PROTO_UDP: u8 = 17;

/// IP protocol number for ICMP
pub const PROTO_ICMP: u8 = 1;

/// Parsed IPv4 header (zero-copy reference)
///
/// The payload is bounded by the Total Length field so that link-layer
/// padding never counts towards a flow's byte counters.
#[derive(Debug)]
pub struct Ipv4Header<'a> {
    buffer: &'a [u8],
    header_len: usize,
    packet_len: usize,
}

impl<'a> Ipv4Header<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < MIN_HEADER_SIZE {
            return Err(Error::Parse("IPv4 header too short".into()));
        }

        if buffer[0] >> 4 != 4 {
            return Err(Error::Parse("not an IPv4 packet".into()));
        }

        let header_len = ((buffer[0] & 0x0F) as usize) * 4;
        if header_len < MIN_HEADER_SIZE {
            return Err(Error::Parse("IPv4 IHL too small".into()));
        }
        if buffer.len() < header_len {
            return Err(Error::Parse("IPv4 header truncated".into()));
        }

        let total_length = u16::from_be_bytes([buffer[2], buffer[3]]) as usize;
        if total_length < header_len || total_length > buffer.len() {
            return Err(Error::Parse(format!(
                "IPv4 total length {} does not fit buffer of {} bytes",
                total_length,
                buffer.len()
            )));
        }

        Ok(Self {
            buffer,
            header_len,
            packet_len: total_length,
        })
    }

    pub fn total_length(&self) -> u16 {
        self.packet_len as u16
    }

    pub fn fragment_offset(&self) -> u16 {
        u16::from_be_bytes([self.buffer[6] & 0x1F, self.buffer[7]])
    }

    pub fn protocol(&self) -> u8 {
        self.buffer[9]
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[12],
            self.buffer[13],
            self.buffer[14],
            self.buffer[15],
        )
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[16],
            self.buffer[17],
            self.buffer[18],
            self.buffer[19],
        )
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[self.header_len..self.packet_len]
    }

    pub fn validate_checksum(&self) -> bool {
        checksum(&self.buffer[..self.header_len]) == 0
    }
}

/// Internet checksum over an IPv4 header
pub fn checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    for chunk in header.chunks(2) {
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

/// Builder for constructing IPv4 packets
#[derive(Debug, Clone)]
pub struct Ipv4Builder {
    ttl: u8,
    protocol: u8,
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
    payload: Vec<u8>,
}

impl Ipv4Builder {
    pub fn new() -> Self {
        Self {
            ttl: 64,
            protocol: PROTO_TCP,
            src_addr: Ipv4Addr::UNSPECIFIED,
            dst_addr: Ipv4Addr::UNSPECIFIED,
            payload: Vec::new(),
        }
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn src_addr(mut self, addr: Ipv4Addr) -> Self {
        self.src_addr = addr;
        self
    }

    pub fn dst_addr(mut self, addr: Ipv4Addr) -> Self {
        self.dst_addr = addr;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let total_length = (MIN_HEADER_SIZE + self.payload.len()) as u16;
        let mut buffer = Vec::with_capacity(total_length as usize);

        buffer.push(0x45); // version 4, IHL 5
        buffer.push(0);
        buffer.extend_from_slice(&total_length.to_be_bytes());
        buffer.extend_from_slice(&[0, 0]); // identification
        buffer.extend_from_slice(&0x4000u16.to_be_bytes()); // DF
        buffer.push(self.ttl);
        buffer.push(self.protocol);
        buffer.extend_from_slice(&[0, 0]);
        buffer.extend_from_slice(&self.src_addr.octets());
        buffer.extend_from_slice(&self.dst_addr.octets());

        let sum = checksum(&buffer);
        buffer[10..12].copy_from_slice(&sum.to_be_bytes());

        buffer.extend_from_slice(&self.payload);
        buffer
    }
}

impl Default for Ipv4Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_packet(payload: &[u8]) -> Vec<u8> {
        Ipv4Builder::new()
            .src_addr(Ipv4Addr::new(10, 0, 0, 42))
            .dst_addr(Ipv4Addr::new(10, 0, 1, 7))
            .payload(payload)
            .build()
    }

    #[test]
    fn test_build_and_parse() {
        let pkt = make_packet(&[1, 2, 3, 4]);
        let hdr = Ipv4Header::parse(&pkt).unwrap();

        assert_eq!(hdr.src_addr(), Ipv4Addr::new(10, 0, 0, 42));
        assert_eq!(hdr.dst_addr(), Ipv4Addr::new(10, 0, 1, 7));
        assert_eq!(hdr.protocol(), PROTO_TCP);
        assert_eq!(hdr.total_length(), 24);
        assert_eq!(hdr.header_len(), 20);
        assert_eq!(hdr.payload(), &[1, 2, 3, 4]);
        assert!(hdr.validate_checksum());
        assert_eq!(hdr.fragment_offset(), 0);
    }

    #[test]
    fn test_payload_excludes_link_padding() {
        let mut pkt = make_packet(&[0xaa; 6]);
        // Ethernet minimum-frame padding
        pkt.extend_from_slice(&[0u8; 20]);

        let hdr = Ipv4Header::parse(&pkt).unwrap();
        assert_eq!(hdr.payload().len(), 6);
    }

    #[test]
    fn test_parse_too_short() {
        assert!(Ipv4Header::parse(&[0x45; 19]).is_err());
    }

    #[test]
    fn test_parse_wrong_version() {
        let mut pkt = make_packet(&[]);
        pkt[0] = 0x65;
        assert!(Ipv4Header::parse(&pkt).is_err());
    }

    #[test]
    fn test_parse_total_length_overrun() {
        let mut pkt = make_packet(&[0; 4]);
        pkt[2..4].copy_from_slice(&200u16.to_be_bytes());
        assert!(Ipv4Header::parse(&pkt).is_err());
    }

    #[test]
    fn test_fragment_offset() {
        let mut pkt = make_packet(&[0; 8]);
        pkt[6] = 0x20; // MF, first fragment
        pkt[7] = 0;
        assert_eq!(Ipv4Header::parse(&pkt).unwrap().fragment_offset(), 0);

        pkt[6] = 0x00;
        pkt[7] = 0xb9; // offset 185 * 8
        assert_eq!(Ipv4Header::parse(&pkt).unwrap().fragment_offset(), 185);
    }
}
