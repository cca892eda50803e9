//! Binary record framing
//!
//! Each record is a fixed 16-byte little-endian header followed by the body:
//!
//! ```text
//! [0xAA 0x55][u16 body_len][u32 event_type][i64 timestamp][body ...]
//! ```
//!
//! The body is the JSON encoding of the caller's value plus one trailing
//! `\n`, so a raw log file can still be inspected line by line. The
//! terminator counts towards `body_len` and is stripped on decode.

use std::io::Read;

use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{EventLogError, EventLogResult, RecordErrorKind};
use crate::event::{Event, EventType};

pub const MAGIC_HI: u8 = 0xAA;
pub const MAGIC_LO: u8 = 0x55;

/// Size of the fixed record header
pub const HEADER_SIZE: usize = 2 + 2 + 4 + 8;

/// Largest body (including the terminator) a record can carry
pub const MAX_BODY_LEN: usize = u16::MAX as usize - 1;

const TERMINATOR: u8 = b'\n';

/// Parsed record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub body_size: u16,
    pub event_type: EventType,
    pub timestamp: i64,
}

impl RecordHeader {
    /// Parse a full header, checking the magic bytes
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Result<Self, RecordErrorKind> {
        if bytes[0] != MAGIC_HI || bytes[1] != MAGIC_LO {
            return Err(RecordErrorKind::InvalidMagic);
        }

        let mut size = [0u8; 2];
        size.copy_from_slice(&bytes[2..4]);
        let mut kind = [0u8; 4];
        kind.copy_from_slice(&bytes[4..8]);
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&bytes[8..16]);

        Ok(Self {
            body_size: u16::from_le_bytes(size),
            event_type: EventType(u32::from_le_bytes(kind)),
            timestamp: i64::from_le_bytes(ts),
        })
    }

    /// Append the encoded header to `out`
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.push(MAGIC_HI);
        out.push(MAGIC_LO);
        out.extend_from_slice(&self.body_size.to_le_bytes());
        out.extend_from_slice(&self.event_type.0.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
    }

    /// Total on-disk length of the record this header describes
    pub fn record_len(&self) -> i64 {
        HEADER_SIZE as i64 + i64::from(self.body_size)
    }
}

/// Encode one record
pub fn encode<T: Serialize + ?Sized>(
    event_type: EventType,
    timestamp: i64,
    value: &T,
) -> EventLogResult<Vec<u8>> {
    let mut body = serde_json::to_vec(value)
        .map_err(|e| EventLogError::encoding(format!("failed to marshal event: {}", e)))?;
    body.push(TERMINATOR);

    if body.len() > MAX_BODY_LEN {
        return Err(EventLogError::encoding(format!(
            "event is too large: {} bytes, limit is {}",
            body.len(),
            MAX_BODY_LEN
        )));
    }

    let header = RecordHeader {
        body_size: body.len() as u16,
        event_type,
        timestamp,
    };

    let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
    header.write_to(&mut out);
    out.extend_from_slice(&body);
    Ok(out)
}

fn malformed(log_id: &str, offset: i64, kind: RecordErrorKind) -> EventLogError {
    EventLogError::MalformedRecord {
        log_id: log_id.to_string(),
        offset,
        kind,
    }
}

fn into_event(header: RecordHeader, mut body: Vec<u8>, at_offset: i64, at_log_id: &str) -> (Event, i64) {
    body.pop();
    let next_offset = at_offset + header.record_len();
    let event = Event {
        event_type: header.event_type,
        timestamp: header.timestamp,
        log_id: at_log_id.to_string(),
        offset: at_offset,
        data: Bytes::from(body),
    };
    (event, next_offset)
}

/// Read until `buf` is full or the stream ends; returns the bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

async fn read_full_async<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Decode one record from a blocking reader
///
/// `at_offset` and `at_log_id` do not affect reading; they are copied into
/// the resulting [`Event`]. Returns `Ok(None)` when the reader is at a clean
/// end of stream (no header bytes at all), otherwise the event and the
/// offset of the next record.
pub fn decode<R: Read>(
    reader: &mut R,
    at_offset: i64,
    at_log_id: &str,
) -> EventLogResult<Option<(Event, i64)>> {
    let mut raw = [0u8; HEADER_SIZE];
    let got = read_full(reader, &mut raw)?;
    if got == 0 {
        return Ok(None);
    }
    if got < HEADER_SIZE {
        return Err(malformed(
            at_log_id,
            at_offset,
            RecordErrorKind::HeaderTooShort { got },
        ));
    }
    let header = RecordHeader::parse(&raw).map_err(|k| malformed(at_log_id, at_offset, k))?;

    let expected = header.body_size as usize;
    let mut body = vec![0u8; expected];
    let got = read_full(reader, &mut body)?;
    if got < expected {
        return Err(malformed(
            at_log_id,
            at_offset,
            RecordErrorKind::BodyTooShort { got, expected },
        ));
    }

    Ok(Some(into_event(header, body, at_offset, at_log_id)))
}

/// Decode one record from an async reader
///
/// Same contract as [`decode`].
pub async fn read_record<R: AsyncRead + Unpin>(
    reader: &mut R,
    at_offset: i64,
    at_log_id: &str,
) -> EventLogResult<Option<(Event, i64)>> {
    let mut raw = [0u8; HEADER_SIZE];
    let got = read_full_async(reader, &mut raw).await?;
    if got == 0 {
        return Ok(None);
    }
    if got < HEADER_SIZE {
        return Err(malformed(
            at_log_id,
            at_offset,
            RecordErrorKind::HeaderTooShort { got },
        ));
    }
    let header = RecordHeader::parse(&raw).map_err(|k| malformed(at_log_id, at_offset, k))?;

    let expected = header.body_size as usize;
    let mut body = vec![0u8; expected];
    let got = read_full_async(reader, &mut body).await?;
    if got < expected {
        return Err(malformed(
            at_log_id,
            at_offset,
            RecordErrorKind::BodyTooShort { got, expected },
        ));
    }

    Ok(Some(into_event(header, body, at_offset, at_log_id)))
}
