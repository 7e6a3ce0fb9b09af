//! Error types for stream sessions.

use thiserror::Error;

use nvrlink_auth::AuthError;
use nvrlink_decode::DecodeError;
use nvrlink_transport::TransportError;

use crate::ingest::IngestRejection;

/// Errors surfaced by a stream session.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Login or stream URL retrieval failed.
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// The stream connection failed.
    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// The decode engine rejected a request.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The ingest buffer is at capacity.
    #[error("Buffer overflow: {buffered} of {capacity} bytes")]
    BufferOverflow { buffered: usize, capacity: usize },

    /// The stream head carries no usable open mode.
    #[error("Invalid stream mode: {0}")]
    InvalidStreamMode(String),

    /// The operation is not legal in the current state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// No decoded frame is available yet.
    #[error("No decoded frame available")]
    NoFrame,

    /// The session has been torn down.
    #[error("Session closed")]
    SessionClosed,
}

impl From<TransportError> for StreamError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::InvalidStreamMode(message) => Self::InvalidStreamMode(message),
            other => Self::Transport(other),
        }
    }
}

impl From<IngestRejection> for StreamError {
    fn from(rejection: IngestRejection) -> Self {
        match rejection {
            IngestRejection::BufferFull { buffered, capacity } => {
                Self::BufferOverflow { buffered, capacity }
            }
        }
    }
}
