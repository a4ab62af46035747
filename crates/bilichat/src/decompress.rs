//! Protocol-version dispatch and pluggable payload decompressors.

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

use crate::error::{DanmakuError, Result};
use crate::packet::{Frame, Packet, split_frames, ver};

/// Decodes a compressed payload into a buffer of back-to-back frames.
pub trait Decompressor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// zlib-wrapped payloads (protocol version 2).
#[derive(Debug, Clone, Copy, Default)]
pub struct Zlib;

impl Decompressor for Zlib {
    fn name(&self) -> &'static str {
        "zlib"
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| DanmakuError::protocol(format!("zlib decompression failed: {}", e)))?;
        Ok(decompressed)
    }
}

/// Brotli payloads (protocol version 3, older protocol revisions).
#[derive(Debug, Clone, Copy, Default)]
pub struct Brotli;

impl Decompressor for Brotli {
    fn name(&self) -> &'static str {
        "brotli"
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decompressed = Vec::new();
        brotli::BrotliDecompress(&mut std::io::Cursor::new(data), &mut decompressed)
            .map_err(|e| DanmakuError::protocol(format!("brotli decompression failed: {}", e)))?;
        Ok(decompressed)
    }
}

/// Outcome of dispatching one received packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// JSON-bearing frames to hand to the classifier.
    Frames(Vec<Frame>),
    /// Heartbeat acknowledgement carrying the room popularity count.
    Popularity(u32),
    /// No decompressor is registered for this protocol version.
    Unsupported(u16),
}

/// Maps protocol-version tags to decompressors.
///
/// Versions 0 (plain JSON) and 1 (popularity count) are built in; every other
/// version is looked up in the table.
#[derive(Clone)]
pub struct DecompressorSet {
    table: HashMap<u16, Arc<dyn Decompressor>>,
}

impl Default for DecompressorSet {
    fn default() -> Self {
        Self::empty()
            .with(ver::ZLIB, Zlib)
            .with(ver::BROTLI, Brotli)
    }
}

impl fmt::Debug for DecompressorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self.table.iter().map(|(v, d)| (*v, d.name())).collect();
        entries.sort_unstable();
        f.debug_struct("DecompressorSet")
            .field("table", &entries)
            .finish()
    }
}

impl DecompressorSet {
    /// A set with no compressed versions registered.
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Register (or replace) the decompressor for `version`.
    pub fn with(mut self, version: u16, decompressor: impl Decompressor + 'static) -> Self {
        self.table.insert(version, Arc::new(decompressor));
        self
    }

    pub fn get(&self, version: u16) -> Option<&Arc<dyn Decompressor>> {
        self.table.get(&version)
    }

    /// Inspect the packet's protocol version and produce its frames.
    ///
    /// Decompression failures are returned as [`DanmakuError::Protocol`]; the
    /// caller drops the packet and keeps reading.
    pub fn dispatch(&self, packet: &Packet) -> Result<Dispatched> {
        match packet.version() {
            ver::RAW_JSON => Ok(Dispatched::Frames(vec![packet.clone()])),
            ver::POPULARITY => {
                if packet.body.len() < 4 {
                    return Err(DanmakuError::protocol(format!(
                        "popularity body too short: {} bytes",
                        packet.body.len()
                    )));
                }
                Ok(Dispatched::Popularity(BigEndian::read_u32(&packet.body[..4])))
            }
            version => match self.get(version) {
                Some(decompressor) => {
                    let decompressed = decompressor.decompress(&packet.body)?;
                    Ok(Dispatched::Frames(split_frames(&Bytes::from(decompressed))))
                }
                None => Ok(Dispatched::Unsupported(version)),
            },
        }
    }
}
