//! On-disk record format.
//!
//! Every WAL, data and tombstone file is a plain concatenation of records:
//!
//! ```text
//! [magic u32 = 0xCAFEBABE][offset u64][body_len u32][body]
//! [xxh3-128(body) 16 bytes][trailer u32 = 0xBEAFECAF]
//! ```
//!
//! All integers are big-endian. A record is accepted only if both magics
//! match, the checksum matches and the full body is present; anything else
//! marks the point where a torn write begins.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use xxhash_rust::xxh3::xxh3_128;

/// Leading record magic.
pub const HEADER_MAGIC: u32 = 0xCAFE_BABE;

/// Trailing record magic.
pub const TRAILER_MAGIC: u32 = 0xBEAF_ECAF;

const PREFIX_LEN: usize = 4 + 8 + 4;
const SUFFIX_LEN: usize = 16 + 4;

/// Bytes a record occupies on disk beyond its body.
pub const RECORD_OVERHEAD: usize = PREFIX_LEN + SUFFIX_LEN;

/// One validated record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Record {
    pub offset: u64,
    pub body: Bytes,
}

/// Append one encoded record to `dst`.
///
/// Callers bound `body` well below `u32::MAX` before encoding.
pub(crate) fn encode(offset: u64, body: &[u8], dst: &mut BytesMut) {
    dst.reserve(RECORD_OVERHEAD + body.len());
    dst.put_u32(HEADER_MAGIC);
    dst.put_u64(offset);
    dst.put_u32(body.len() as u32);
    dst.put_slice(body);
    dst.put_slice(&xxh3_128(body).to_be_bytes());
    dst.put_u32(TRAILER_MAGIC);
}

/// Outcome of validating a file's records from the start.
#[derive(Debug, Default)]
pub(crate) struct Scan {
    /// Records before the first invalid byte, in file order
    pub records: Vec<Record>,
    /// Length of the valid prefix
    pub valid_len: usize,
    /// Why scanning stopped early, if it did
    pub torn: Option<&'static str>,
}

/// Validate the records in `data`.
///
/// Offsets must be strictly increasing within one file; the first violation
/// ends the valid prefix like any other corruption.
pub(crate) fn scan(data: &Bytes) -> Scan {
    let mut out = Scan::default();
    let mut last: Option<u64> = None;

    while out.valid_len < data.len() {
        let rest = &data[out.valid_len..];
        match decode_one(rest) {
            Ok((offset, body_len)) => {
                if last.is_some_and(|prev| offset <= prev) {
                    out.torn = Some("offset not increasing");
                    break;
                }
                let start = out.valid_len + PREFIX_LEN;
                out.records.push(Record { offset, body: data.slice(start..start + body_len) });
                out.valid_len += RECORD_OVERHEAD + body_len;
                last = Some(offset);
            },
            Err(reason) => {
                out.torn = Some(reason);
                break;
            },
        }
    }

    out
}

/// Validate the record at the start of `buf`, returning its offset and body
/// length.
fn decode_one(mut buf: &[u8]) -> Result<(u64, usize), &'static str> {
    let total = buf.len();
    if total < PREFIX_LEN {
        return Err("truncated record header");
    }
    if buf.get_u32() != HEADER_MAGIC {
        return Err("bad record magic");
    }
    let offset = buf.get_u64();
    let body_len = buf.get_u32() as usize;

    if total - PREFIX_LEN < body_len + SUFFIX_LEN {
        return Err("truncated record body");
    }
    let (body, mut suffix) = buf.split_at(body_len);

    let mut checksum = [0u8; 16];
    suffix.copy_to_slice(&mut checksum);
    if u128::from_be_bytes(checksum) != xxh3_128(body) {
        return Err("checksum mismatch");
    }
    if suffix.get_u32() != TRAILER_MAGIC {
        return Err("bad trailer magic");
    }

    Ok((offset, body_len))
}

/// Encode a message body: `[id_len u16][id utf-8][payload]`.
pub(crate) fn encode_message(message_id: &str, payload: &[u8]) -> BytesMut {
    let mut body = BytesMut::with_capacity(2 + message_id.len() + payload.len());
    body.put_u16(message_id.len() as u16);
    body.put_slice(message_id.as_bytes());
    body.put_slice(payload);
    body
}

/// Split a message body back into its id and payload.
pub(crate) fn decode_message(body: &Bytes) -> Option<(String, Bytes)> {
    let mut buf = &body[..];
    if buf.len() < 2 {
        return None;
    }
    let id_len = buf.get_u16() as usize;
    if buf.len() < id_len {
        return None;
    }
    let id = std::str::from_utf8(&buf[..id_len]).ok()?.to_owned();
    Some((id, body.slice(2 + id_len..)))
}
