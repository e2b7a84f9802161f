//! Passive lifecycle tracking
//!
//! The tracker never originates segments; it only watches the handshake and
//! teardown of each TCP flow and decides whether a segment is admitted.
//! UDP and ICMP echo flows have no handshake: they are NEW until the peer
//! answers and ESTABLISHED afterwards ([`advance_datagram`]).
//!
//! Both transition functions are pure so they can be tested exhaustively
//! and applied with a single compare-exchange on the entry.

use super::key::Direction;
use crate::protocol::tcp::TcpFlags;
use std::fmt;

/// Verdict returned to the prerouting stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Drop,
}

/// Connection state as seen by the tracker
///
/// `FinWait` and `Closing` remember which side sent the first FIN: the
/// second FIN must come from the other side, and the final ACK from the
/// first closer. `New` is used by datagram flows only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CtState {
    None,
    /// Datagram flow with no reply yet
    New,
    SynSent,
    SynReceived,
    Established,
    FinWait(Direction),
    Closing(Direction),
    Closed,
}

impl CtState {
    /// Position along the lifecycle; never decreases for a tracked flow
    pub fn rank(self) -> u8 {
        match self {
            CtState::None => 0,
            CtState::New | CtState::SynSent => 1,
            CtState::SynReceived => 2,
            CtState::Established => 3,
            CtState::FinWait(_) => 4,
            CtState::Closing(_) => 5,
            CtState::Closed => 6,
        }
    }

    /// Compact code used for atomic storage and snapshots
    pub fn to_code(self) -> u8 {
        match self {
            CtState::None => 0,
            CtState::SynSent => 1,
            CtState::SynReceived => 2,
            CtState::Established => 3,
            CtState::FinWait(Direction::Original) => 4,
            CtState::FinWait(Direction::Reply) => 5,
            CtState::Closing(Direction::Original) => 6,
            CtState::Closing(Direction::Reply) => 7,
            CtState::Closed => 8,
            CtState::New => 9,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => CtState::None,
            1 => CtState::SynSent,
            2 => CtState::SynReceived,
            3 => CtState::Established,
            4 => CtState::FinWait(Direction::Original),
            5 => CtState::FinWait(Direction::Reply),
            6 => CtState::Closing(Direction::Original),
            7 => CtState::Closing(Direction::Reply),
            8 => CtState::Closed,
            9 => CtState::New,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            CtState::None => "NONE",
            CtState::New => "NEW",
            CtState::SynSent => "SYN_SENT",
            CtState::SynReceived => "SYN_RECEIVED",
            CtState::Established => "ESTABLISHED",
            CtState::FinWait(_) => "FIN_WAIT",
            CtState::Closing(_) => "CLOSING",
            CtState::Closed => "CLOSED",
        }
    }

    /// Handshake not completed yet
    pub fn is_embryonic(self) -> bool {
        matches!(
            self,
            CtState::None | CtState::New | CtState::SynSent | CtState::SynReceived
        )
    }
}

impl fmt::Display for CtState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of feeding one segment to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: CtState,
    pub verdict: Verdict,
}

impl Transition {
    fn accept(state: CtState) -> Self {
        Self {
            state,
            verdict: Verdict::Accept,
        }
    }

    fn drop(state: CtState) -> Self {
        Self {
            state,
            verdict: Verdict::Drop,
        }
    }
}

/// Advance `state` by one observed segment
pub fn advance(state: CtState, flags: TcpFlags, direction: Direction) -> Transition {
    use Direction::{Original, Reply};

    if state == CtState::None {
        return if flags.is_syn_only() && direction == Original {
            Transition::accept(CtState::SynSent)
        } else {
            Transition::drop(CtState::None)
        };
    }

    if flags.rst() {
        return Transition::accept(CtState::Closed);
    }

    match state {
        CtState::None | CtState::New => Transition::drop(state),
        CtState::SynSent => {
            if flags.is_syn_ack() && direction == Reply {
                Transition::accept(CtState::SynReceived)
            } else if flags.is_syn_only() && direction == Original {
                // retransmitted SYN
                Transition::accept(state)
            } else {
                Transition::drop(state)
            }
        }
        CtState::SynReceived => {
            if flags.ack() && !flags.syn() && direction == Original {
                Transition::accept(CtState::Established)
            } else if flags.is_syn_ack() && direction == Reply {
                Transition::accept(state)
            } else {
                Transition::drop(state)
            }
        }
        CtState::Established => {
            if flags.fin() {
                Transition::accept(CtState::FinWait(direction))
            } else {
                Transition::accept(state)
            }
        }
        CtState::FinWait(closer) => {
            if flags.fin() && direction == closer.opposite() {
                Transition::accept(CtState::Closing(closer))
            } else {
                Transition::accept(state)
            }
        }
        CtState::Closing(closer) => {
            if flags.ack() && !flags.fin() && direction == closer {
                Transition::accept(CtState::Closed)
            } else {
                Transition::accept(state)
            }
        }
        CtState::Closed => {
            if flags.fin() || flags.ack() {
                Transition::accept(state)
            } else {
                Transition::drop(state)
            }
        }
    }
}

/// Advance a UDP or ICMP echo flow by one observed packet
///
/// Any packet from the originator opens the flow; the first reply
/// establishes it.
pub fn advance_datagram(state: CtState, direction: Direction) -> Transition {
    match (state, direction) {
        (CtState::None, Direction::Original) | (CtState::New, Direction::Original) => {
            Transition::accept(CtState::New)
        }
        (CtState::New, Direction::Reply) | (CtState::Established, _) => {
            Transition::accept(CtState::Established)
        }
        _ => Transition::drop(state),
    }
}
