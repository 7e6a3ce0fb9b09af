//! Stream transport for network video devices.
//!
//! This crate owns the duplex WebSocket to the device's stream endpoint,
//! classifies what arrives on it, and finds stream heads inside the
//! binary payload.

mod connection;
mod error;
mod framer;
mod message;
mod socket;

pub use connection::ReconnectPolicy;
pub use error::TransportError;
pub use framer::{
    classify_chunk, find_head_magic, media_info_from_sdp, RawChunk, StreamHead, StreamOpenMode,
    HEAD_LEN, HEAD_MAGIC, MEDIA_INFO_MARKER,
};
pub use message::{classify_text, ControlCommand, InboundMessage};
pub use socket::{Connection, StreamConnector, TransportEvent, WsConnector};

/// Channel capacity for inbound transport events.
pub const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Channel capacity for outgoing control commands.
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 16;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Maximum reconnection attempts.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Base reconnect delay in milliseconds.
pub const BASE_RECONNECT_DELAY_MS: u64 = 500;
