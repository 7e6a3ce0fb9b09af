//! Stream session state machine types.

use serde::{Deserialize, Serialize};

/// The state of a stream session's connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    /// Nothing opened yet.
    #[default]
    Idle,

    /// Duplex connection requested, waiting for the device to describe the stream.
    AwaitingHandshake,

    /// Media info seen, waiting for the head to be accepted by the decode engine.
    AwaitingHead,

    /// Stream data is flowing into the decode engine.
    Streaming,

    /// The device was asked to pause delivery.
    Paused,

    /// Teardown in progress.
    Closing,

    /// Terminal state.
    Closed,

    /// The session hit an error it cannot continue from.
    Errored {
        /// Error message.
        message: String,
    },
}

/// Everything that can move a session between states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTrigger {
    /// `open()` was called and the connection is being established.
    Open,

    /// SDP media info or a stream head arrived.
    MediaInfo,

    /// The decode engine accepted the stream head.
    StreamOpened,

    /// `pause()` was called.
    Pause,

    /// `resume()` was called.
    Resume,

    /// The transport closed without being asked to.
    TransportClosed {
        /// Whether the session will reconnect.
        recoverable: bool,
    },

    /// `destroy()` was called.
    Destroy,

    /// Teardown finished releasing resources.
    Released,

    /// An unrecoverable error occurred.
    Fault { message: String },
}

impl StreamState {
    /// Returns the state reached from `self` on `trigger`.
    ///
    /// The function is total: triggers that have no meaning in the current
    /// state leave it unchanged. `Closed` never changes; `Errored` only
    /// accepts `Destroy`.
    pub fn next(&self, trigger: &StreamTrigger) -> StreamState {
        use StreamTrigger as T;

        match (self, trigger) {
            (Self::Closed, _) => Self::Closed,
            (_, T::Destroy) => Self::Closing,
            (Self::Closing, T::Released) => Self::Closed,
            (Self::Closing, _) => Self::Closing,
            (Self::Errored { .. }, _) => self.clone(),
            (_, T::Fault { message }) => Self::Errored {
                message: message.clone(),
            },
            (_, T::TransportClosed { recoverable: true }) => Self::AwaitingHandshake,
            (_, T::TransportClosed { recoverable: false }) => Self::Closed,
            (Self::Idle, T::Open) => Self::AwaitingHandshake,
            (Self::AwaitingHandshake, T::MediaInfo) => Self::AwaitingHead,
            (Self::AwaitingHead, T::StreamOpened) => Self::Streaming,
            (Self::Streaming, T::Pause) => Self::Paused,
            (Self::Paused, T::Resume) => Self::Streaming,
            _ => self.clone(),
        }
    }

    /// Returns true once no further transitions can occur.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns true while stream data is being delivered.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    /// Returns true if the session is paused.
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::AwaitingHandshake => "AwaitingHandshake",
            Self::AwaitingHead => "AwaitingHead",
            Self::Streaming => "Streaming",
            Self::Paused => "Paused",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
            Self::Errored { .. } => "Errored",
        }
    }
}
