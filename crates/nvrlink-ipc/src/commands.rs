//! What a stream session is asked to play.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The media a session requests once its transport is up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamTarget {
    /// Live view of a channel.
    RealPlay { channel: u32 },

    /// Recorded footage of a channel between two instants.
    Playback {
        channel: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl StreamTarget {
    /// Channel number as seen by the user (before the device offset).
    pub fn channel(&self) -> u32 {
        match self {
            Self::RealPlay { channel } | Self::Playback { channel, .. } => *channel,
        }
    }
}
