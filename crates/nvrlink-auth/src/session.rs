//! Session lifecycle: login, token tracking, logout.

use std::fmt;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use nvrlink_ipc::{AuthProtocol, ClientConfig};

use crate::api::{ControlApi, LoginRequest, LoginResponse};
use crate::digest::compute_digest;
use crate::error::AuthError;
use crate::xml::extract_xml_value;
use crate::{AuthResult, SESSION_ID_VERSION};

/// Opaque value identifying an authenticated session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wrap a token value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw token value.
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

/// Runs the challenge-response login and owns the resulting session.
pub struct SessionAuthenticator<A> {
    api: A,
    username: String,
    password: String,
    protocol: AuthProtocol,
    host: String,
    ws_port: u16,
    token: RwLock<Option<SessionToken>>,
    login_gate: Mutex<()>,
}

impl<A: ControlApi> SessionAuthenticator<A> {
    /// Create an authenticator for the device described by `config`.
    pub fn new(api: A, config: &ClientConfig) -> Self {
        Self {
            api,
            username: config.username.clone(),
            password: config.password.clone(),
            protocol: config.protocol,
            host: config.host.clone(),
            ws_port: config.ws_port,
            token: RwLock::new(None),
            login_gate: Mutex::new(()),
        }
    }

    /// The control API this authenticator talks to.
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Log in and store the session token.
    ///
    /// Concurrent callers are serialized so only one attempt is in flight.
    #[instrument(name = "session_login", skip(self), fields(user = %self.username))]
    pub async fn login(&self) -> AuthResult<SessionToken> {
        let _gate = self.login_gate.lock().await;

        let challenge = self.api.capabilities(&self.username).await?;
        let digest = compute_digest(&challenge, &self.username, &self.password);

        let request = LoginRequest {
            username: self.username.clone(),
            digest,
            session_id: challenge.session_id,
            session_id_version: SESSION_ID_VERSION,
        };
        let response = self.api.login(&request).await?;
        let token = self.extract_token(&response)?;

        *self.token.write() = Some(token.clone());
        info!(protocol = ?self.protocol, "Session established");
        Ok(token)
    }

    fn extract_token(&self, response: &LoginResponse) -> AuthResult<SessionToken> {
        let value = match self.protocol {
            AuthProtocol::V1 => extract_xml_value(&response.body, "sessionID"),
            AuthProtocol::V2 => response.set_cookie.clone(),
        };

        match value {
            Some(value) if !value.is_empty() => Ok(SessionToken::new(value)),
            _ => {
                let status = extract_xml_value(&response.body, "statusString")
                    .unwrap_or_else(|| "no session in login response".to_string());
                Err(AuthError::AuthenticationFailed(status))
            }
        }
    }

    /// End the session. The local token is cleared even if the device call fails.
    #[instrument(name = "session_logout", skip(self))]
    pub async fn logout(&self) -> AuthResult<()> {
        let token = self.token.write().take();
        match token {
            Some(token) => {
                let result = self.api.logout(&token).await;
                if let Err(ref e) = result {
                    warn!("Logout request failed: {}", e);
                }
                result
            }
            None => {
                debug!("Logout without session, nothing to do");
                Ok(())
            }
        }
    }

    /// The current session token, if logged in.
    pub fn token(&self) -> Option<SessionToken> {
        self.token.read().clone()
    }

    /// Whether a session token is held.
    pub fn is_authenticated(&self) -> bool {
        self.token.read().is_some()
    }

    /// Forget the token without contacting the device.
    pub fn invalidate(&self) {
        *self.token.write() = None;
    }

    /// Build the stream WebSocket URL for the current session.
    ///
    /// Protocol v2 devices need a fresh stream token per connection.
    pub async fn stream_url(&self) -> AuthResult<String> {
        let token = self.token().ok_or(AuthError::NotAuthenticated)?;
        let base = format!(
            "ws://{}:{}/?version=1.0&cipherSuites=1",
            self.host, self.ws_port
        );

        match self.protocol {
            AuthProtocol::V1 => Ok(format!("{base}&sessionID={}", token.value())),
            AuthProtocol::V2 => {
                let stream_token = self.api.stream_token(&token).await?;
                Ok(format!("{base}&token={stream_token}"))
            }
        }
    }
}
