//! Decode engine message protocol.

use bytes::Bytes;

use nvrlink_ipc::DecodedFrame;

/// `errorCode` reported when the engine drained before its first frame.
pub const UNDERRUN_NOT_FIRST_FRAME: i32 = 31;

/// Frame size passed with `OpenStream`.
pub const STREAM_HEAD_FRAME_SIZE: usize = 40;

/// Decoder buffer pool size passed with `OpenStream`.
pub const DECODE_POOL_SIZE: usize = 2 * 1024 * 1024;

/// Image format for still export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StillFormat {
    Bmp,
    Jpeg,
}

impl StillFormat {
    /// Engine command and callback name.
    pub fn function(self) -> &'static str {
        match self {
            Self::Bmp => "GetBMP",
            Self::Jpeg => "GetJPEG",
        }
    }
}

/// A command for the decode engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderCommand {
    /// Open a stream from its head.
    OpenStream {
        head: Bytes,
        frame_size: usize,
        pool_size: usize,
    },

    /// Select length-prefixed (0) or raw (1) input.
    SetStreamOpenMode(u8),

    /// Select full (0) or reduced (1) frame decoding.
    SetDecodeFrameType(u8),

    /// Cap the engine's input buffer in bytes.
    SetInputBufferCap(usize),

    /// Feed stream bytes.
    InputData(Bytes),

    /// Encode a decoded frame as a still image.
    ExportStill {
        format: StillFormat,
        frame: DecodedFrame,
    },
}

impl DecoderCommand {
    /// Engine command name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenStream { .. } => "OpenStream",
            Self::SetStreamOpenMode(_) => "SetStreamOpenMode",
            Self::SetDecodeFrameType(_) => "SetDecodeFrameType",
            Self::SetInputBufferCap(_) => "SetInputBufferCap",
            Self::InputData(_) => "InputData",
            Self::ExportStill { format, .. } => format.function(),
        }
    }
}

/// What a frame-data callback carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Video,
    Other,
}

/// A callback from the decode engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderCallback {
    /// The engine finished loading and accepts commands.
    Loaded,

    /// The engine consumed input and possibly produced a frame.
    FrameData {
        error_code: i32,
        kind: FrameKind,
        frame: Option<DecodedFrame>,
    },

    /// A still export finished.
    Still { format: StillFormat, data: Bytes },
}

impl DecoderCallback {
    /// Engine `function` tag.
    pub fn function(&self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::FrameData { .. } => "GetFrameData",
            Self::Still { format, .. } => format.function(),
        }
    }

    /// Whether this reports the underrun-before-first-frame condition.
    pub fn is_underrun(&self) -> bool {
        matches!(
            self,
            Self::FrameData {
                error_code: UNDERRUN_NOT_FIRST_FRAME,
                ..
            }
        )
    }
}
