//! Binary snapshot of a tracking table
//!
//! ```text
//! header (12 bytes)
//!   0..4   magic "CTSN"
//!   4..6   version (1)
//!   6..8   reserved, zero
//!   8..12  record count
//! record (64 bytes each, key in the initiator's orientation)
//!   0..4   src addr          4..6   src port
//!   6..10  dst addr          10..12 dst port
//!   12     protocol          13     state code (see `CtState::to_code`)
//!   14..16 reserved, zero
//!   16..24 created ms        24..32 last seen ms
//!   32..40 original packets  40..48 original bytes
//!   48..56 reply packets     56..64 reply bytes
//! ```
//!
//! All integers are big-endian. Timestamps are offsets from the process-wide
//! conntrack epoch, so a snapshot is meaningful only inside the process that
//! produced it.

use super::clock::Timestamp;
use super::entry::{Counters, EntryView};
use super::key::FlowKey;
use super::state::CtState;
use super::table::{ConnTrackTable, TableConfig};
use crate::protocol::ipv4::PROTO_TCP;
use crate::{Error, Result};
use std::collections::HashSet;
use std::net::Ipv4Addr;

pub const MAGIC: [u8; 4] = *b"CTSN";
pub const VERSION: u16 = 1;
pub const HEADER_SIZE: usize = 12;
pub const RECORD_SIZE: usize = 64;

/// Encode every entry of `table`
pub fn serialize(table: &ConnTrackTable) -> Vec<u8> {
    let mut out = Vec::new();
    serialize_to(table, &mut out);
    out
}

/// Append the encoding of `table` to `out`
pub fn serialize_to(table: &ConnTrackTable, out: &mut Vec<u8>) {
    let views = table.entries();
    out.reserve(HEADER_SIZE + views.len() * RECORD_SIZE);

    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&(views.len() as u32).to_be_bytes());

    for view in &views {
        encode_record(view, out);
    }
}

/// Build a new table holding exactly the flows in `bytes`
///
/// Nothing is constructed unless the whole input is valid.
pub fn deserialize(bytes: &[u8], config: TableConfig) -> Result<ConnTrackTable> {
    let records = decode(bytes)?;
    if records.len() > config.max_entries {
        return Err(Error::CapacityExceeded {
            limit: config.max_entries,
        });
    }

    let table = ConnTrackTable::with_config(config);
    for view in &records {
        table.insert_restored(view);
    }
    Ok(table)
}

/// Validate `bytes` and decode every record
pub fn decode(bytes: &[u8]) -> Result<Vec<EntryView>> {
    if bytes.len() < HEADER_SIZE {
        return Err(corrupt(format!(
            "{} bytes is shorter than the header",
            bytes.len()
        )));
    }
    if bytes[0..4] != MAGIC {
        return Err(corrupt("bad magic"));
    }

    let version = read_u16(bytes, 4);
    if version != VERSION {
        return Err(corrupt(format!("unsupported version {}", version)));
    }
    if read_u16(bytes, 6) != 0 {
        return Err(corrupt("non-zero reserved header field"));
    }

    let count = read_u32(bytes, 8) as usize;
    let expected = count
        .checked_mul(RECORD_SIZE)
        .and_then(|n| n.checked_add(HEADER_SIZE))
        .ok_or_else(|| corrupt("record count overflows"))?;
    if bytes.len() != expected {
        return Err(corrupt(format!(
            "{} records need {} bytes, got {}",
            count,
            expected,
            bytes.len()
        )));
    }

    let mut seen = HashSet::with_capacity(count);
    let mut records = Vec::with_capacity(count);
    for (i, record) in bytes[HEADER_SIZE..].chunks_exact(RECORD_SIZE).enumerate() {
        let view = decode_record(record).map_err(|e| match e {
            Error::CorruptSnapshot(msg) => corrupt(format!("record {}: {}", i, msg)),
            other => other,
        })?;
        if !seen.insert(view.origin.canonical()) {
            return Err(corrupt(format!(
                "record {}: duplicate flow {}",
                i, view.origin
            )));
        }
        records.push(view);
    }

    Ok(records)
}

fn encode_record(view: &EntryView, out: &mut Vec<u8>) {
    let key = &view.origin;
    out.extend_from_slice(&key.src_ip.octets());
    out.extend_from_slice(&key.src_port.to_be_bytes());
    out.extend_from_slice(&key.dst_ip.octets());
    out.extend_from_slice(&key.dst_port.to_be_bytes());
    out.push(key.protocol);
    out.push(view.state.to_code());
    out.extend_from_slice(&[0, 0]);
    for value in [
        view.created.as_millis(),
        view.last_seen.as_millis(),
        view.original.packets,
        view.original.bytes,
        view.reply.packets,
        view.reply.bytes,
    ] {
        out.extend_from_slice(&value.to_be_bytes());
    }
}

fn decode_record(record: &[u8]) -> Result<EntryView> {
    let state = CtState::from_code(record[13])
        .ok_or_else(|| corrupt(format!("unknown state code {}", record[13])))?;
    if record[14] != 0 || record[15] != 0 {
        return Err(corrupt("non-zero reserved record field"));
    }

    let origin = FlowKey::new(
        read_ipv4(record, 0),
        read_ipv4(record, 6),
        read_u16(record, 4),
        read_u16(record, 10),
        record[12],
    );

    // datagram flows only ever hold NONE, NEW or ESTABLISHED; TCP never NEW
    let fits = match (origin.protocol, state) {
        (PROTO_TCP, CtState::New) => false,
        (PROTO_TCP, _) => true,
        (_, s) => matches!(s, CtState::None | CtState::New | CtState::Established),
    };
    if !fits {
        return Err(corrupt(format!("state {} on flow {}", state, origin)));
    }

    Ok(EntryView {
        origin,
        state,
        created: Timestamp::from_millis(read_u64(record, 16)),
        last_seen: Timestamp::from_millis(read_u64(record, 24)),
        original: Counters {
            packets: read_u64(record, 32),
            bytes: read_u64(record, 40),
        },
        reply: Counters {
            packets: read_u64(record, 48),
            bytes: read_u64(record, 56),
        },
    })
}

fn corrupt(msg: impl Into<String>) -> Error {
    Error::CorruptSnapshot(msg.into())
}

// Callers check lengths before reading fixed offsets.
fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_be_bytes(raw)
}

fn read_ipv4(buf: &[u8], at: usize) -> Ipv4Addr {
    Ipv4Addr::new(buf[at], buf[at + 1], buf[at + 2], buf[at + 3])
}
