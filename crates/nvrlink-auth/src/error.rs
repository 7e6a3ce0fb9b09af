//! Error types for the auth module.

use thiserror::Error;

/// Errors that can occur while authenticating against a device.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The HTTP request itself failed (connect, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The device answered with a non-success status.
    #[error("Device returned status {status} for {path}")]
    Status { status: u16, path: String },

    /// Login completed but yielded no usable session.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A response was missing fields or could not be parsed.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// An operation needing a session ran before login.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Client configuration could not be used.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
