//! Binary packet codec.
//!
//! Every message on the danmaku connection starts with a fixed 16-byte
//! big-endian header:
//!
//! ```text
//! [u32 total_len][u16 header_len = 16][u16 version][u32 operation][u32 sequence]
//! ```
//!
//! followed by `total_len - header_len` bytes of payload. Decompressed
//! payloads contain several such packets ("frames") packed back to back.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::error::{DanmakuError, Result};

/// Size of the fixed packet header.
pub const HEADER_LEN: usize = 16;

/// Operation codes
pub mod op {
    pub const HEARTBEAT: u32 = 2;
    pub const HEARTBEAT_REPLY: u32 = 3;
    pub const NOTIFICATION: u32 = 5;
    pub const AUTH: u32 = 7;
    pub const AUTH_REPLY: u32 = 8;
}

/// Protocol versions
pub mod ver {
    pub const RAW_JSON: u16 = 0;
    pub const POPULARITY: u16 = 1;
    pub const ZLIB: u16 = 2;
    pub const BROTLI: u16 = 3;
}

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub total_len: u32,
    pub header_len: u16,
    pub version: u16,
    pub operation: u32,
    pub sequence: u32,
}

impl PacketHeader {
    /// Parse a header from the first 16 bytes of `buf`.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            total_len: BigEndian::read_u32(&buf[0..4]),
            header_len: BigEndian::read_u16(&buf[4..6]),
            version: BigEndian::read_u16(&buf[6..8]),
            operation: BigEndian::read_u32(&buf[8..12]),
            sequence: BigEndian::read_u32(&buf[12..16]),
        })
    }

    fn write(&self, dst: &mut BytesMut) {
        dst.put_u32(self.total_len);
        dst.put_u16(self.header_len);
        dst.put_u16(self.version);
        dst.put_u32(self.operation);
        dst.put_u32(self.sequence);
    }
}

/// A packet (or frame, when extracted from a decompressed payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub body: Bytes,
}

/// A sub-message extracted from a decompressed payload.
pub type Frame = Packet;

impl Packet {
    /// Encode a packet: 16-byte header followed by `payload`.
    pub fn encode(version: u16, operation: u32, sequence: u32, payload: &[u8]) -> Bytes {
        let total_len = HEADER_LEN + payload.len();
        let mut buf = BytesMut::with_capacity(total_len);
        PacketHeader {
            total_len: total_len as u32,
            header_len: HEADER_LEN as u16,
            version,
            operation,
            sequence,
        }
        .write(&mut buf);
        buf.put_slice(payload);
        buf.freeze()
    }

    /// Decode exactly one packet from the start of `data`.
    ///
    /// Unlike [`split_frames`], a truncated or inconsistent packet is an error.
    pub fn decode(data: &Bytes) -> Result<Self> {
        let header = PacketHeader::parse(data).ok_or_else(|| {
            DanmakuError::protocol(format!("packet too short: {} bytes", data.len()))
        })?;
        let (body_start, body_end) = body_range(&header, data.len()).ok_or_else(|| {
            DanmakuError::protocol(format!(
                "inconsistent packet header {:?} for {} bytes",
                header,
                data.len()
            ))
        })?;
        Ok(Self {
            header,
            body: data.slice(body_start..body_end),
        })
    }

    pub fn version(&self) -> u16 {
        self.header.version
    }

    pub fn operation(&self) -> u32 {
        self.header.operation
    }
}

/// Body bounds of a packet that starts at offset 0 of an `available`-byte buffer.
fn body_range(header: &PacketHeader, available: usize) -> Option<(usize, usize)> {
    let total = header.total_len as usize;
    let header_len = header.header_len as usize;
    if total < HEADER_LEN || total > available {
        return None;
    }
    if header_len < HEADER_LEN || header_len > total {
        return None;
    }
    Some((header_len, total))
}

/// Split a buffer of back-to-back packets into frames.
///
/// Scanning stops at the first frame whose declared length is shorter than a
/// header or runs past the end of the buffer; the frames decoded up to that
/// point are returned and the remainder is discarded.
pub fn split_frames(buf: &Bytes) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut offset = 0;

    while offset + HEADER_LEN <= buf.len() {
        let rest = &buf[offset..];
        let Some(header) = PacketHeader::parse(rest) else {
            break;
        };
        let Some((body_start, body_end)) = body_range(&header, rest.len()) else {
            debug!(
                offset,
                declared = header.total_len,
                remaining = rest.len(),
                "Dropping malformed or truncated frame"
            );
            break;
        };

        frames.push(Packet {
            header,
            body: buf.slice(offset + body_start..offset + body_end),
        });
        offset += header.total_len as usize;
    }

    frames
}
