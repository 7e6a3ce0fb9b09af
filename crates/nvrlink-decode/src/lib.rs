//! Actor facade over the external video decode engine.
//!
//! The engine itself is opaque. It is driven through a [`DecodeWorker`]
//! that runs on its own task and exchanges [`DecoderCommand`]s and
//! [`DecoderCallback`]s with the pipeline. Commands travel over a bounded
//! channel, callbacks over an unbounded one.

mod bridge;
mod error;
mod protocol;
mod worker;

pub use bridge::DecodeBridge;
pub use error::DecodeError;
pub use protocol::{
    DecoderCallback, DecoderCommand, FrameKind, StillFormat, DECODE_POOL_SIZE,
    STREAM_HEAD_FRAME_SIZE, UNDERRUN_NOT_FIRST_FRAME,
};
pub use worker::{DecodeWorker, NullWorker};

/// Channel capacity for commands to the decode worker.
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Result type for decode operations.
pub type DecodeResult<T> = Result<T, DecodeError>;
