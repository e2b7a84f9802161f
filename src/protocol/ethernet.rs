//! Ethernet II framing, enough to locate the IPv4 payload of a captured frame

use crate::{Error, Result};

/// Ethernet header size without VLAN tag
pub const HEADER_SIZE: usize = 14;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_VLAN: u16 = 0x8100;

/// Parsed Ethernet frame (zero-copy reference)
#[derive(Debug)]
pub struct Frame<'a> {
    buffer: &'a [u8],
    ethertype: u16,
    vlan_id: Option<u16>,
    payload_offset: usize,
}

impl<'a> Frame<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("frame too short".into()));
        }

        let outer = u16::from_be_bytes([buffer[12], buffer[13]]);
        if outer != ETHERTYPE_VLAN {
            return Ok(Self {
                buffer,
                ethertype: outer,
                vlan_id: None,
                payload_offset: HEADER_SIZE,
            });
        }

        if buffer.len() < HEADER_SIZE + 4 {
            return Err(Error::Parse("VLAN frame too short".into()));
        }
        let tci = u16::from_be_bytes([buffer[14], buffer[15]]);

        Ok(Self {
            buffer,
            ethertype: u16::from_be_bytes([buffer[16], buffer[17]]),
            vlan_id: Some(tci & 0x0FFF),
            payload_offset: HEADER_SIZE + 4,
        })
    }

    /// Inner EtherType (after any VLAN tag)
    pub fn ethertype(&self) -> u16 {
        self.ethertype
    }

    pub fn vlan_id(&self) -> Option<u16> {
        self.vlan_id
    }

    pub fn is_ipv4(&self) -> bool {
        self.ethertype == ETHERTYPE_IPV4
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[self.payload_offset..]
    }
}
