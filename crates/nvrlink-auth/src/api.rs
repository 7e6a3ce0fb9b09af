//! The slice of the device control API that session login depends on.

use async_trait::async_trait;

use crate::digest::SessionChallenge;
use crate::session::SessionToken;
use crate::xml::escape_xml_text;
use crate::AuthResult;

/// Body of a session login request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub username: String,
    pub digest: String,
    pub session_id: String,
    pub session_id_version: u32,
}

impl LoginRequest {
    /// Render the `SessionLogin` XML document.
    pub fn to_xml(&self) -> String {
        format!(
            "<SessionLogin><userName>{}</userName><password>{}</password><sessionID>{}</sessionID>\
             <isSessionIDValidLongTerm>false</isSessionIDValidLongTerm>\
             <sessionIDVersion>{}</sessionIDVersion></SessionLogin>",
            escape_xml_text(&self.username),
            escape_xml_text(&self.digest),
            escape_xml_text(&self.session_id),
            self.session_id_version,
        )
    }
}

/// What came back from a login request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginResponse {
    /// Response body (XML).
    pub body: String,

    /// First `Set-Cookie` header value, if any.
    pub set_cookie: Option<String>,
}

/// Device endpoints consumed by [`SessionAuthenticator`](crate::SessionAuthenticator).
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Fetch the login challenge for `username`.
    async fn capabilities(&self, username: &str) -> AuthResult<SessionChallenge>;

    /// Submit a login request.
    async fn login(&self, request: &LoginRequest) -> AuthResult<LoginResponse>;

    /// Fetch a WebSocket token for protocol v2 devices.
    async fn stream_token(&self, session: &SessionToken) -> AuthResult<String>;

    /// End the session on the device.
    async fn logout(&self, session: &SessionToken) -> AuthResult<()>;
}
