//! Error types for the decode bridge.

use thiserror::Error;

/// Errors that can occur while talking to the decode engine.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// A command was issued before the engine reported it was loaded.
    #[error("Decode engine unavailable")]
    EngineUnavailable,

    /// An export request was dropped before the engine answered.
    #[error("Export request abandoned")]
    ExportAbandoned,

    /// The bridge task is gone.
    #[error("Decode bridge channel closed")]
    ChannelClosed,

    /// Invalid command arguments.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
