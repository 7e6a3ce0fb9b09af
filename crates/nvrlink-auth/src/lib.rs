//! Challenge-response session login for network video devices.
//!
//! The device hands out a per-attempt challenge, the client answers with an
//! iterated SHA-256 digest, and the resulting session token authorizes both
//! control requests and the stream WebSocket.

mod api;
mod digest;
mod error;
mod isapi;
mod session;
pub mod xml;

pub use api::{ControlApi, LoginRequest, LoginResponse};
pub use digest::{compute_digest, sha256_hex, SessionChallenge};
pub use error::AuthError;
pub use isapi::{HeaderScheme, IsapiClient};
pub use session::{SessionAuthenticator, SessionToken};

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Session id version announced in login requests.
pub const SESSION_ID_VERSION: u32 = 2;
