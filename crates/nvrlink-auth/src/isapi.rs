//! reqwest-backed client for the device control API.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::header::SET_COOKIE;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use tracing::{debug, instrument};

use nvrlink_ipc::{AuthProtocol, ClientConfig};

use crate::api::{ControlApi, LoginRequest, LoginResponse};
use crate::digest::SessionChallenge;
use crate::error::AuthError;
use crate::session::SessionToken;
use crate::xml::extract_xml_value;
use crate::AuthResult;

const CAPABILITIES_PATH: &str = "/ISAPI/Security/sessionLogin/capabilities";
const LOGIN_PATH: &str = "/ISAPI/Security/sessionLogin";
const LOGOUT_PATH: &str = "/ISAPI/Security/sessionLogout";
const TOKEN_PATH: &str = "/ISAPI/Security/token";

/// How the session token travels on control requests.
///
/// Fixed at construction from the device protocol and proxy settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderScheme {
    /// `Cookie: WebSession=<token>`.
    WebSessionCookie,

    /// `Cookie: <raw set-cookie value>`.
    RawCookie,

    /// Proxy mode: `proxy: <device url>` and `session: <token>`.
    Proxy { device_url: String },
}

impl HeaderScheme {
    /// Pick the scheme for a client configuration.
    pub fn for_config(config: &ClientConfig) -> Self {
        if config.proxy.is_some() {
            return Self::Proxy {
                device_url: config.device_url(),
            };
        }
        match config.protocol {
            AuthProtocol::V1 => Self::WebSessionCookie,
            AuthProtocol::V2 => Self::RawCookie,
        }
    }

    /// Header pairs carrying `token`.
    pub fn headers(&self, token: &SessionToken) -> Vec<(&'static str, String)> {
        match self {
            Self::WebSessionCookie => vec![("Cookie", format!("WebSession={}", token.value()))],
            Self::RawCookie => vec![("Cookie", token.value().to_string())],
            Self::Proxy { device_url } => vec![
                ("proxy", device_url.clone()),
                ("session", token.value().to_string()),
            ],
        }
    }

    fn apply(&self, mut builder: RequestBuilder, token: &SessionToken) -> RequestBuilder {
        for (name, value) in self.headers(token) {
            builder = builder.header(name, value);
        }
        builder
    }
}

#[derive(Debug, Deserialize)]
struct TokenEnvelope {
    #[serde(rename = "Token")]
    token: TokenValue,
}

#[derive(Debug, Deserialize)]
struct TokenValue {
    value: String,
}

/// Control API client for one device.
#[derive(Debug, Clone)]
pub struct IsapiClient {
    http: Client,
    base_url: String,
    scheme: HeaderScheme,
}

impl IsapiClient {
    /// Create a client from configuration.
    pub fn new(config: &ClientConfig) -> AuthResult<Self> {
        if config.host.is_empty() {
            return Err(AuthError::InvalidConfig("host is empty".to_string()));
        }

        let http = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        let base_url = config
            .proxy
            .clone()
            .unwrap_or_else(|| config.device_url())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http,
            base_url,
            scheme: HeaderScheme::for_config(config),
        })
    }

    /// The header scheme in use.
    pub fn scheme(&self) -> &HeaderScheme {
        &self.scheme
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn check_status(response: Response, path: &str) -> AuthResult<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(AuthError::Status {
            status: status.as_u16(),
            path: path.to_string(),
        })
    }
}

fn required_field(xml: &str, tag: &str) -> AuthResult<String> {
    extract_xml_value(xml, tag)
        .ok_or_else(|| AuthError::MalformedResponse(format!("missing <{tag}>")))
}

/// Parse a `SessionLoginCap` document.
pub(crate) fn parse_capabilities(xml: &str) -> AuthResult<SessionChallenge> {
    let iterations = required_field(xml, "iterations")?;
    let iterations = iterations
        .parse::<i64>()
        .map_err(|e| AuthError::MalformedResponse(format!("iterations '{iterations}': {e}")))?;

    Ok(SessionChallenge {
        session_id: required_field(xml, "sessionID")?,
        challenge: required_field(xml, "challenge")?,
        iterations,
        is_irreversible: extract_xml_value(xml, "isIrreversible").as_deref() == Some("true"),
        salt: extract_xml_value(xml, "salt").unwrap_or_default(),
    })
}

fn timestamp_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[async_trait]
impl ControlApi for IsapiClient {
    #[instrument(name = "isapi_capabilities", skip(self))]
    async fn capabilities(&self, username: &str) -> AuthResult<SessionChallenge> {
        let response = self
            .http
            .get(self.url(CAPABILITIES_PATH))
            .query(&[("username", username)])
            .send()
            .await?;
        let body = check_status(response, CAPABILITIES_PATH)?.text().await?;
        let challenge = parse_capabilities(&body)?;

        debug!(
            iterations = challenge.iterations,
            irreversible = challenge.is_irreversible,
            "Received session challenge"
        );
        Ok(challenge)
    }

    #[instrument(name = "isapi_login", skip(self, request), fields(user = %request.username))]
    async fn login(&self, request: &LoginRequest) -> AuthResult<LoginResponse> {
        let response = self
            .http
            .post(self.url(LOGIN_PATH))
            .query(&[("timeStamp", timestamp_ms().to_string())])
            .header("Content-Type", "application/xml")
            .body(request.to_xml())
            .send()
            .await?;
        let response = check_status(response, LOGIN_PATH)?;

        let set_cookie = response
            .headers()
            .get(SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(LoginResponse { body, set_cookie })
    }

    async fn stream_token(&self, session: &SessionToken) -> AuthResult<String> {
        let builder = self
            .http
            .get(self.url(TOKEN_PATH))
            .query(&[("format", "json")]);
        let response = self.scheme.apply(builder, session).send().await?;
        let envelope: TokenEnvelope = check_status(response, TOKEN_PATH)?.json().await?;
        Ok(envelope.token.value)
    }

    #[instrument(name = "isapi_logout", skip(self, session))]
    async fn logout(&self, session: &SessionToken) -> AuthResult<()> {
        let builder = self.http.put(self.url(LOGOUT_PATH));
        let response = self.scheme.apply(builder, session).send().await?;
        check_status(response, LOGOUT_PATH)?;
        Ok(())
    }
}
