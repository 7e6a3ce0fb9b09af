//! Events published by a stream session.

use bytes::Bytes;

use crate::state::StreamState;
use crate::types::DecodedFrame;

/// The kind of an event, used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Decoded video frames.
    Video,

    /// Session closed notifications.
    Close,

    /// Uninterpreted inbound bytes.
    RawData,

    /// Stream state transitions.
    StateChanged,
}

impl EventKind {
    /// Wire-style name of the event kind.
    pub fn name(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Close => "close",
            Self::RawData => "raw-data",
            Self::StateChanged => "state-changed",
        }
    }
}

/// An event delivered to subscribed listeners.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A frame came out of the decode engine.
    Video(DecodedFrame),

    /// The session closed and will not recover by itself.
    Close {
        /// Why the session closed.
        reason: String,
    },

    /// Bytes received from the transport, before interpretation.
    RawData(Bytes),

    /// The session moved between states.
    StateChanged {
        previous: StreamState,
        current: StreamState,
    },
}

impl StreamEvent {
    /// The subscription key for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Video(_) => EventKind::Video,
            Self::Close { .. } => EventKind::Close,
            Self::RawData(_) => EventKind::RawData,
            Self::StateChanged { .. } => EventKind::StateChanged,
        }
    }
}
