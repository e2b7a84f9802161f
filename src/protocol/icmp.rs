//! ICMP (Internet Control Message Protocol) - RFC 792
//!
//! Only echo request/reply are tracked; the identifier pairs a reply with
//! its request.

use crate::{Error, Result};
use std::net::Ipv4Addr;

/// ICMP header size (minimum)
pub const HEADER_SIZE: usize = 8;

pub const ECHO_REPLY: u8 = 0;
pub const ECHO_REQUEST: u8 = 8;

/// Parsed ICMP message
#[derive(Debug)]
pub struct IcmpPacket<'a> {
    buffer: &'a [u8],
}

impl<'a> IcmpPacket<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("ICMP packet too short".into()));
        }

        Ok(Self { buffer })
    }

    pub fn icmp_type(&self) -> u8 {
        self.buffer[0]
    }

    /// For Echo Request/Reply: identifier
    pub fn identifier(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    pub fn is_echo_request(&self) -> bool {
        self.icmp_type() == ECHO_REQUEST
    }

    pub fn is_echo_reply(&self) -> bool {
        self.icmp_type() == ECHO_REPLY
    }
}

/// Internet checksum over an ICMP message
pub fn icmp_checksum(data: &[u8]) -> u16 {
    super::ipv4::checksum(data)
}

/// Builder for an ICMP echo message wrapped in an IPv4 packet
#[derive(Debug, Clone)]
pub struct EchoBuilder {
    src: Ipv4Addr,
    dst: Ipv4Addr,
    icmp_type: u8,
    identifier: u16,
    sequence: u16,
}

impl EchoBuilder {
    pub fn request(src: Ipv4Addr, dst: Ipv4Addr, identifier: u16) -> Self {
        Self {
            src,
            dst,
            icmp_type: ECHO_REQUEST,
            identifier,
            sequence: 0,
        }
    }

    pub fn reply(src: Ipv4Addr, dst: Ipv4Addr, identifier: u16) -> Self {
        Self {
            icmp_type: ECHO_REPLY,
            ..Self::request(src, dst, identifier)
        }
    }

    pub fn sequence(mut self, sequence: u16) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut message = vec![self.icmp_type, 0, 0, 0];
        message.extend_from_slice(&self.identifier.to_be_bytes());
        message.extend_from_slice(&self.sequence.to_be_bytes());
        let sum = icmp_checksum(&message);
        message[2..4].copy_from_slice(&sum.to_be_bytes());

        super::ipv4::Ipv4Builder::new()
            .src_addr(self.src)
            .dst_addr(self.dst)
            .protocol(super::ipv4::PROTO_ICMP)
            .payload(&message)
            .build()
    }
}
