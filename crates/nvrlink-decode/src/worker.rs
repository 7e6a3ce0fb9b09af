//! Decode worker seam.

use tracing::debug;

use crate::protocol::{DecoderCallback, DecoderCommand, FrameKind};
use crate::DecodeResult;

/// Something that executes decode engine commands.
///
/// Runs on the bridge task; callbacks returned from a call are delivered in
/// order before the next command is handled.
pub trait DecodeWorker: Send + 'static {
    /// Bring the engine up. The bridge accepts commands once `Loaded` is
    /// among the returned callbacks.
    fn start(&mut self) -> DecodeResult<Vec<DecoderCallback>> {
        Ok(vec![DecoderCallback::Loaded])
    }

    /// Execute one command.
    fn handle(&mut self, command: DecoderCommand) -> DecodeResult<Vec<DecoderCallback>>;

    /// Get worker name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Worker that decodes nothing but acknowledges input like an engine would.
///
/// Every batch is answered with a video callback that carries no picture,
/// so ingest keeps releasing data when no real engine is attached.
#[derive(Debug, Default)]
pub struct NullWorker {
    opened: bool,
    bytes_in: u64,
}

impl NullWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received through `InputData`.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }
}

impl DecodeWorker for NullWorker {
    fn handle(&mut self, command: DecoderCommand) -> DecodeResult<Vec<DecoderCallback>> {
        match command {
            DecoderCommand::OpenStream { head, .. } => {
                debug!(head_len = head.len(), "Null worker opened stream");
                self.opened = true;
                Ok(Vec::new())
            }
            DecoderCommand::InputData(data) if self.opened => {
                self.bytes_in += data.len() as u64;
                Ok(vec![DecoderCallback::FrameData {
                    error_code: 0,
                    kind: FrameKind::Video,
                    frame: None,
                }])
            }
            DecoderCommand::ExportStill { format, frame } => {
                Ok(vec![DecoderCallback::Still {
                    format,
                    data: frame.data,
                }])
            }
            _ => Ok(Vec::new()),
        }
    }

    fn name(&self) -> &'static str {
        "null"
    }
}
