//! Packet capture backends
//!
//! Taps deliver link-layer frames to the prerouting hooks. They only
//! observe traffic; acting on a DROP verdict is up to the forwarding plane.

mod af_packet;

pub use af_packet::AfPacketTap;

use crate::protocol::ethernet::Frame;
use crate::Result;
use std::future::Future;

/// Information about a received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxInfo {
    /// Number of bytes stored in the buffer
    pub len: usize,
    /// Length of the frame on the wire
    pub wire_len: usize,
    /// Frame was sent by this host (looped back to the tap)
    pub outgoing: bool,
}

impl RxInfo {
    /// The frame did not fit the receive buffer
    pub fn truncated(&self) -> bool {
        self.wire_len > self.len
    }
}

/// Receive side of a capture backend
pub trait PacketSource: Send + Sync {
    /// Interface the source is bound to
    fn name(&self) -> &str;

    /// Receive a frame into the provided buffer
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = Result<RxInfo>> + Send;
}

/// IPv4 packet carried by an Ethernet frame, if any
pub fn ipv4_packet(frame: &[u8]) -> Option<&[u8]> {
    let frame = Frame::parse(frame).ok()?;
    frame.is_ipv4().then(|| frame.payload())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ethernet::{ETHERTYPE_IPV4, ETHERTYPE_VLAN};

    fn frame(ethertypes: &[u16], payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0xff; 6];
        buf.extend_from_slice(&[0x02, 0, 0, 0, 0, 1]);
        for (i, et) in ethertypes.iter().enumerate() {
            buf.extend_from_slice(&et.to_be_bytes());
            if i + 1 < ethertypes.len() {
                // VLAN TCI
                buf.extend_from_slice(&[0x00, 0x64]);
            }
        }
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_ipv4_packet() {
        let raw = frame(&[ETHERTYPE_IPV4], &[0x45, 0x00]);
        assert_eq!(ipv4_packet(&raw), Some(&[0x45, 0x00][..]));
    }

    #[test]
    fn test_ipv4_packet_vlan() {
        let raw = frame(&[ETHERTYPE_VLAN, ETHERTYPE_IPV4], &[0x45]);
        assert_eq!(ipv4_packet(&raw), Some(&[0x45][..]));
    }

    #[test]
    fn test_non_ipv4_ignored() {
        let raw = frame(&[0x0806], &[0u8; 28]);
        assert_eq!(ipv4_packet(&raw), None);
        assert_eq!(ipv4_packet(&raw[..10]), None);
    }
}
