//! Stream session pipeline.
//!
//! This crate ties the transport, the ingest buffer and the decode bridge
//! into one session task and exposes it through [`StreamSession`].

mod error;
mod events;
mod ingest;
mod metrics;
mod policy;
mod session;
mod state;

pub use error::StreamError;
pub use events::{EventBus, Listener, ListenerId};
pub use ingest::{FrameAck, IngestBuffer, IngestRejection, READY_UNIT, UNDERRUN_RETRY_DELAY};
pub use metrics::MetricsCollector;
pub use policy::{DecodePolicy, PolicyOutcome};
pub use session::{StreamSession, UrlProvider};
pub use state::{StreamStateMachine, Transition};

/// Result type for stream session operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Channel capacity for commands from the session handle.
pub const SESSION_COMMAND_CAPACITY: usize = 16;
