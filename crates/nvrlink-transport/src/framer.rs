//! Stream head detection.
//!
//! Devices announce a stream by sending a 40-byte head that starts with the
//! `IMKH` magic. It arrives either as a small binary chunk of its own or hex
//! encoded inside the SDP text after `MEDIAINFO=`. Everything else on the
//! socket is opaque media payload.

use bytes::Bytes;
use tracing::debug;

use crate::error::TransportError;
use crate::TransportResult;

/// Magic bytes opening every stream head.
pub const HEAD_MAGIC: [u8; 4] = *b"IMKH";

/// Length of a stream head in bytes.
pub const HEAD_LEN: usize = 40;

/// Marker preceding the hex encoded head in SDP text.
pub const MEDIA_INFO_MARKER: &str = "MEDIAINFO=";

/// Binary chunk sizes that may carry a stream head.
const HEAD_CARRIER_LENGTHS: [usize; 2] = [40, 64];

/// Offset of the byte selecting the open mode.
const OPEN_MODE_OFFSET: usize = 8;

/// Head byte value for length-prefixed framing.
const FRAMED_MODE_BYTE: u8 = 4;

/// How payload bytes are delivered to the decode engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOpenMode {
    /// Every chunk is prefixed with its little-endian u32 length.
    FramedWithLengthPrefix,

    /// Chunks are passed through untouched.
    RawRtp,
}

impl StreamOpenMode {
    /// Value carried by `SetStreamOpenMode`.
    pub fn engine_value(self) -> u8 {
        match self {
            Self::FramedWithLengthPrefix => 0,
            Self::RawRtp => 1,
        }
    }

    /// Whether chunks need a length prefix.
    pub fn is_framed(self) -> bool {
        matches!(self, Self::FramedWithLengthPrefix)
    }
}

/// The head that opens a stream in the decode engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHead {
    bytes: Bytes,
    mode: StreamOpenMode,
}

impl StreamHead {
    /// Validate head bytes and read the open mode from them.
    pub fn from_bytes(bytes: Bytes) -> TransportResult<Self> {
        let mode_byte = bytes.get(OPEN_MODE_OFFSET).copied().ok_or_else(|| {
            TransportError::InvalidStreamMode(format!(
                "head of {} bytes has no mode byte",
                bytes.len()
            ))
        })?;

        let mode = if mode_byte == FRAMED_MODE_BYTE {
            StreamOpenMode::FramedWithLengthPrefix
        } else {
            StreamOpenMode::RawRtp
        };

        Ok(Self { bytes, mode })
    }

    /// Raw head bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Open mode announced by the head.
    pub fn open_mode(&self) -> StreamOpenMode {
        self.mode
    }
}

/// A binary chunk after head detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    /// Chunk payload; the head itself when `is_head` is set.
    pub data: Bytes,

    /// Whether this chunk is a stream head.
    pub is_head: bool,
}

/// Position of the head magic in `data`, if any.
pub fn find_head_magic(data: &[u8]) -> Option<usize> {
    data.windows(HEAD_MAGIC.len())
        .position(|window| window == HEAD_MAGIC)
}

/// Classify one binary chunk from the socket.
///
/// Only head-sized chunks are searched; the head is the 40 bytes starting at
/// the magic, truncated at the chunk end.
pub fn classify_chunk(data: Bytes) -> RawChunk {
    if !HEAD_CARRIER_LENGTHS.contains(&data.len()) {
        return RawChunk {
            data,
            is_head: false,
        };
    }

    match find_head_magic(&data) {
        Some(start) => {
            let end = (start + HEAD_LEN).min(data.len());
            debug!(offset = start, len = end - start, "Found stream head");
            RawChunk {
                data: data.slice(start..end),
                is_head: true,
            }
        }
        None => RawChunk {
            data,
            is_head: false,
        },
    }
}

/// Extract the stream head from SDP text.
///
/// Returns `None` when the marker is missing or the hex is malformed.
pub fn media_info_from_sdp(sdp: &str) -> Option<Bytes> {
    let start = sdp.find(MEDIA_INFO_MARKER)? + MEDIA_INFO_MARKER.len();
    let hex_len = HEAD_LEN * 2;
    let encoded: String = sdp[start..].chars().take(hex_len).collect();

    match hex::decode(&encoded) {
        Ok(bytes) if !bytes.is_empty() => Some(Bytes::from(bytes)),
        Ok(_) => None,
        Err(e) => {
            debug!("Malformed media info in SDP: {}", e);
            None
        }
    }
}
