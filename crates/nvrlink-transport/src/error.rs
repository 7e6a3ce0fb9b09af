//! Error types for the transport module.

use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid stream URL.
    #[error("Invalid stream URL: {0}")]
    InvalidUrl(String),

    /// Send failed.
    #[error("Send failed: {0}")]
    Send(String),

    /// Reconnect exhausted.
    #[error("Reconnect attempts exhausted after {0} attempts")]
    ReconnectExhausted(u32),

    /// Not connected.
    #[error("Not connected")]
    NotConnected,

    /// The stream head does not carry a usable open mode.
    #[error("Invalid stream mode: {0}")]
    InvalidStreamMode(String),

    /// Malformed control message.
    #[error("Protocol error: {0}")]
    Protocol(String),
}
