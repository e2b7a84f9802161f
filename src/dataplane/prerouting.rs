//! Stateful admission at prerouting
//!
//! One [`Prerouting`] hook exists per interface. It resolves the interface's
//! table through its [`TableHandle`] once per packet, so a table swap takes
//! effect from the next packet on while packets in flight finish against
//! the table they resolved.

use crate::conntrack::{ConnTrackTable, CtState, FlowKey, TableHandle, Timestamp, Verdict};
use crate::protocol::icmp::IcmpPacket;
use crate::protocol::ipv4::{Ipv4Header, PROTO_ICMP, PROTO_TCP, PROTO_UDP};
use crate::protocol::tcp::{TcpFlags, TcpHeader};
use crate::protocol::udp::UdpHeader;
use crate::telemetry::InterfaceStats;
use crate::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

/// Fallback for packets the tracker cannot classify
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnclassifiedPolicy {
    #[default]
    Accept,
    Drop,
}

impl UnclassifiedPolicy {
    pub fn verdict(self) -> Verdict {
        match self {
            UnclassifiedPolicy::Accept => Verdict::Accept,
            UnclassifiedPolicy::Drop => Verdict::Drop,
        }
    }
}

/// What the tracker needs from one IPv4 packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Key in the orientation of this packet
    pub key: FlowKey,
    /// TCP control bits; empty for UDP and ICMP
    pub flags: TcpFlags,
    /// IPv4 total length
    pub len: usize,
    /// May open a flow when none is tracked
    pub opens: bool,
}

impl Segment {
    /// Extract flow identity from an IPv4 packet
    ///
    /// TCP, UDP and ICMP echo request/reply are tracked. ICMP echo is keyed
    /// as `(src, identifier) -> (dst, 0)` for requests and the reverse for
    /// replies. Anything else, and any non-initial fragment, is
    /// unclassifiable and returns [`Error::MalformedInput`].
    pub fn parse(packet: &[u8]) -> Result<Self> {
        let ip = Ipv4Header::parse(packet).map_err(malformed)?;
        if ip.fragment_offset() != 0 {
            return Err(Error::MalformedInput(
                "non-initial fragment carries no transport header".into(),
            ));
        }

        let (src, dst) = (ip.src_addr(), ip.dst_addr());
        let len = ip.total_length() as usize;
        let datagram = |src_port, dst_port, opens| Self {
            key: FlowKey::new(src, dst, src_port, dst_port, ip.protocol()),
            flags: TcpFlags::NONE,
            len,
            opens,
        };

        match ip.protocol() {
            PROTO_TCP => {
                let tcp = TcpHeader::parse(ip.payload()).map_err(malformed)?;
                Ok(Self {
                    key: FlowKey::tcp((src, tcp.src_port()), (dst, tcp.dst_port())),
                    flags: tcp.flags(),
                    len,
                    opens: tcp.flags().is_syn_only(),
                })
            }
            PROTO_UDP => {
                let udp = UdpHeader::parse(ip.payload()).map_err(malformed)?;
                Ok(datagram(udp.src_port(), udp.dst_port(), true))
            }
            PROTO_ICMP => {
                let icmp = IcmpPacket::parse(ip.payload()).map_err(malformed)?;
                if icmp.is_echo_request() {
                    Ok(datagram(icmp.identifier(), 0, true))
                } else if icmp.is_echo_reply() {
                    Ok(datagram(0, icmp.identifier(), false))
                } else {
                    Err(Error::MalformedInput(format!(
                        "untracked ICMP type {}",
                        icmp.icmp_type()
                    )))
                }
            }
            other => Err(Error::MalformedInput(format!(
                "untracked protocol {}",
                other
            ))),
        }
    }
}

fn malformed(e: Error) -> Error {
    Error::MalformedInput(e.to_string())
}

/// Per-interface prerouting hook
#[derive(Debug)]
pub struct Prerouting {
    name: String,
    handle: Arc<TableHandle>,
    stats: Arc<InterfaceStats>,
    policy: UnclassifiedPolicy,
}

impl Prerouting {
    pub fn new(
        name: impl Into<String>,
        handle: Arc<TableHandle>,
        stats: Arc<InterfaceStats>,
        policy: UnclassifiedPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            handle,
            stats,
            policy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &Arc<TableHandle> {
        &self.handle
    }

    pub fn stats(&self) -> &Arc<InterfaceStats> {
        &self.stats
    }

    pub fn policy(&self) -> UnclassifiedPolicy {
        self.policy
    }

    /// Decide on a raw IPv4 packet
    pub fn inspect(&self, packet: &[u8], now: Timestamp) -> Verdict {
        self.stats.record_rx(packet.len());

        let verdict = match Segment::parse(packet) {
            Ok(segment) => self.admit(&segment, now),
            Err(e) => self.unclassified(&e),
        };

        self.count(verdict);
        verdict
    }

    /// Decide on a packet the capture cut short
    ///
    /// `wire_len` is its IPv4 length before truncation. Its flow cannot be
    /// tracked, so the unclassified policy applies.
    pub fn inspect_truncated(&self, wire_len: usize) -> Verdict {
        self.stats.record_rx(wire_len);
        self.stats.truncated.inc();
        let verdict = self.unclassified(&"truncated by capture");
        self.count(verdict);
        verdict
    }

    fn unclassified(&self, reason: &dyn fmt::Display) -> Verdict {
        self.stats.unclassified.inc();
        trace!("{}: unclassified packet ({}), {:?}", self.name, reason, self.policy);
        self.policy.verdict()
    }

    /// Decide on an already parsed segment
    pub fn classify(&self, segment: &Segment, now: Timestamp) -> Verdict {
        let verdict = self.admit(segment, now);
        self.count(verdict);
        verdict
    }

    fn count(&self, verdict: Verdict) {
        match verdict {
            Verdict::Accept => self.stats.prerouting_accepted.inc(),
            Verdict::Drop => self.stats.prerouting_dropped.inc(),
        }
    }

    fn admit(&self, segment: &Segment, now: Timestamp) -> Verdict {
        let table = self.handle.get();
        let verdict = track(&table, segment, now);
        if verdict == Verdict::Drop {
            table.note_drop();
        }
        trace!(
            "{}: {} [{:?}] -> {:?}",
            self.name,
            segment.key,
            segment.flags,
            verdict
        );
        verdict
    }
}

/// Run one segment through `table`, creating or replacing its entry as needed
fn track(table: &ConnTrackTable, segment: &Segment, now: Timestamp) -> Verdict {
    let opens = segment.opens;

    let entry = match table.lookup(&segment.key) {
        Some(entry) if opens && entry.state() == CtState::Closed => {
            match table.reopen(&segment.key, now) {
                Ok(entry) => entry,
                Err(e) => return refuse(&segment.key, e),
            }
        }
        Some(entry) => entry,
        // only a SYN or a datagram from the initiator opens a flow
        None if !opens => return Verdict::Drop,
        None => match table.lookup_or_create(&segment.key, now) {
            Ok((entry, _)) => entry,
            Err(e) => return refuse(&segment.key, e),
        },
    };

    let direction = entry.direction_of(&segment.key);
    let step = entry.advance(segment.flags, direction);
    if step.verdict == Verdict::Accept {
        entry.record(direction, segment.len, now);
    }

    if segment.flags.rst() && step.state == CtState::Closed && table.remove_entry(&entry) {
        table.stats().evicted.inc();
    }

    step.verdict
}

fn refuse(key: &FlowKey, err: Error) -> Verdict {
    warn!("conntrack: refusing new flow {}: {}", key, err);
    Verdict::Drop
}
