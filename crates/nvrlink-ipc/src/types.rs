//! Common types shared across the session pipeline.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A frame produced by the decode engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Decoded pixel data.
    pub data: Bytes,

    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// On-screen-display timestamp reported by the device.
    pub osd_time: String,
}

/// How much work the decode engine spends per frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeFrameMode {
    /// Decode every frame.
    #[default]
    Full,

    /// Drop or lighten frame decoding to catch up.
    Reduced,
}

impl DecodeFrameMode {
    /// Value carried by `SetDecodeFrameType`.
    pub fn engine_value(self) -> u8 {
        match self {
            Self::Full => 0,
            Self::Reduced => 1,
        }
    }
}

/// How the device hands back a session after login.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProtocol {
    /// Session id in the login response body, sent back as `WebSession` cookie.
    #[default]
    V1,

    /// Session carried by `Set-Cookie`, streams use a separate token.
    V2,
}

/// Reconnect tuning for recoverable sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Maximum reconnect attempts before the session closes.
    pub max_attempts: u32,

    /// First backoff delay in milliseconds.
    pub base_delay_ms: u64,

    /// Backoff ceiling in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

/// Configuration for one device client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Device address.
    pub host: String,

    /// HTTP control port.
    pub http_port: u16,

    /// Stream WebSocket port.
    pub ws_port: u16,

    /// Login user.
    pub username: String,

    /// Login password.
    pub password: String,

    /// Timeout for each control request in milliseconds.
    pub request_timeout_ms: u64,

    /// Proxy base URL; requests go there and name the device in a header.
    pub proxy: Option<String>,

    /// Session protocol generation of the device.
    pub protocol: AuthProtocol,

    /// Added to the user channel number to build stream URLs.
    pub channel_offset: u32,

    /// Whether a lost stream connection is re-established.
    pub recoverable: bool,

    /// Ingest buffer capacity in bytes.
    pub ingest_capacity: usize,

    /// Target bytes per decode-engine input call.
    pub batch_target: usize,

    /// Number of decoded frames kept for consumers.
    pub frame_window: usize,

    /// Reconnect tuning.
    pub reconnect: ReconnectSettings,
}

impl ClientConfig {
    /// Base URL of the device control API.
    pub fn device_url(&self) -> String {
        format!("http://{}:{}", self.host, self.http_port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.64".to_string(),
            http_port: 80,
            ws_port: 7681,
            username: "admin".to_string(),
            password: String::new(),
            request_timeout_ms: 10_000,
            proxy: None,
            protocol: AuthProtocol::V1,
            channel_offset: 32,
            recoverable: false,
            ingest_capacity: 4 * 1024 * 1024,
            batch_target: 5000,
            frame_window: 3,
            reconnect: ReconnectSettings::default(),
        }
    }
}

/// Snapshot of session counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamMetrics {
    /// Bytes received from the transport.
    pub bytes_received: u64,

    /// Chunks accepted into the ingest buffer.
    pub chunks_ingested: u64,

    /// Chunks rejected because the ingest buffer was full.
    pub chunks_rejected: u64,

    /// Synthetic ready units injected in place of data.
    pub chunks_throttled: u64,

    /// Frames delivered by the decode engine.
    pub frames_decoded: u64,

    /// Decoded frames per second since the last snapshot.
    pub fps: f32,

    /// Reconnects performed.
    pub reconnects: u64,

    /// Ingest buffer fullness percentage (0-100).
    pub buffer_fullness_percent: f32,

    /// Session uptime in seconds.
    pub uptime_seconds: u64,
}
