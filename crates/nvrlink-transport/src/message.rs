//! Inbound message classification and outbound control commands.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use nvrlink_ipc::StreamTarget;

use crate::error::TransportError;
use crate::TransportResult;

/// Timestamp layout used by playback commands.
const PLAYBACK_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Something received on the stream socket.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Cipher negotiation reply; carries nothing the client acts on.
    Handshake,

    /// Session description announcing the stream.
    Sdp(String),

    /// Any other JSON text.
    Control(Value),
}

/// Classify a text frame.
pub fn classify_text(text: &str) -> TransportResult<InboundMessage> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| TransportError::Protocol(format!("non-JSON text frame: {e}")))?;

    let has = |key: &str| value.get(key).is_some_and(|v| !v.is_null());

    if has("version") && has("cipherSuite") {
        return Ok(InboundMessage::Handshake);
    }

    if let Some(sdp) = value.get("sdp").and_then(Value::as_str) {
        return Ok(InboundMessage::Sdp(sdp.to_string()));
    }

    Ok(InboundMessage::Control(value))
}

/// A command sent to the device over the stream socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlCommand {
    sequence: u32,
    cmd: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_time: Option<String>,
}

impl ControlCommand {
    fn bare(cmd: &'static str) -> Self {
        Self {
            sequence: 0,
            cmd,
            url: None,
            start_time: None,
            end_time: None,
        }
    }

    /// Start live view of a device channel id.
    pub fn realplay(host: &str, port: u16, channel_id: u32) -> Self {
        Self {
            url: Some(format!("live://{host}:{port}/{channel_id}/1")),
            ..Self::bare("realplay")
        }
    }

    /// Start playback of a time range on a device channel id.
    pub fn playback(
        host: &str,
        port: u16,
        channel_id: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            url: Some(format!("live://{host}:{port}/{channel_id}/0")),
            start_time: Some(start.format(PLAYBACK_TIME_FORMAT).to_string()),
            end_time: Some(end.format(PLAYBACK_TIME_FORMAT).to_string()),
            ..Self::bare("playback")
        }
    }

    /// Start command for `target`, offsetting the user channel number.
    pub fn for_target(target: &StreamTarget, host: &str, port: u16, channel_offset: u32) -> Self {
        let channel_id = channel_offset + target.channel();
        match target {
            StreamTarget::RealPlay { .. } => Self::realplay(host, port, channel_id),
            StreamTarget::Playback { start, end, .. } => {
                Self::playback(host, port, channel_id, *start, *end)
            }
        }
    }

    /// Pause playback.
    pub fn pause() -> Self {
        Self::bare("pause")
    }

    /// Resume playback.
    pub fn resume() -> Self {
        Self::bare("resume")
    }

    /// Command name.
    pub fn name(&self) -> &'static str {
        self.cmd
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> TransportResult<String> {
        serde_json::to_string(self).map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_handshake_is_recognized() {
        let msg = classify_text(r#"{"version":"1.0","cipherSuite":0}"#).unwrap();
        assert_eq!(msg, InboundMessage::Handshake);

        // Either key alone is not a handshake.
        let msg = classify_text(r#"{"version":"1.0"}"#).unwrap();
        assert!(matches!(msg, InboundMessage::Control(_)));
    }

    #[test]
    fn test_sdp_is_extracted() {
        let msg = classify_text(r#"{"sdp":"v=0 MEDIAINFO=494D4B48"}"#).unwrap();
        assert_eq!(msg, InboundMessage::Sdp("v=0 MEDIAINFO=494D4B48".to_string()));
    }

    #[test]
    fn test_non_json_text_is_protocol_error() {
        assert!(matches!(
            classify_text("hello"),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn test_realplay_command() {
        let target = StreamTarget::RealPlay { channel: 1 };
        let json = ControlCommand::for_target(&target, "10.0.0.2", 7681, 32)
            .to_json()
            .unwrap();
        assert_eq!(
            json,
            r#"{"sequence":0,"cmd":"realplay","url":"live://10.0.0.2:7681/33/1"}"#
        );
    }

    #[test]
    fn test_playback_command() {
        let target = StreamTarget::Playback {
            channel: 2,
            start: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 5).unwrap(),
        };
        let json = ControlCommand::for_target(&target, "nvr", 7681, 32)
            .to_json()
            .unwrap();
        assert_eq!(
            json,
            r#"{"sequence":0,"cmd":"playback","url":"live://nvr:7681/34/0","startTime":"2024-03-01T08:00:00Z","endTime":"2024-03-01T09:30:05Z"}"#
        );
    }

    #[test]
    fn test_pause_resume_commands() {
        assert_eq!(
            ControlCommand::pause().to_json().unwrap(),
            r#"{"sequence":0,"cmd":"pause"}"#
        );
        assert_eq!(
            ControlCommand::resume().to_json().unwrap(),
            r#"{"sequence":0,"cmd":"resume"}"#
        );
    }
}
