//! Shared stream session types for nvrlink.
//!
//! This crate defines the vocabulary used between the session pipeline,
//! its collaborators, and the consumers subscribed to its events.

mod commands;
mod events;
mod state;
mod types;

pub use commands::StreamTarget;
pub use events::{EventKind, StreamEvent};
pub use state::{StreamState, StreamTrigger};
pub use types::{
    AuthProtocol, ClientConfig, DecodeFrameMode, DecodedFrame, ReconnectSettings, StreamMetrics,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for events delivered to channel-based consumers.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<StreamEvent>, Receiver<StreamEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
