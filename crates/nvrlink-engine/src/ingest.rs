//! Ingest buffer between the stream socket and the decode engine.
//!
//! Bytes are queued as they arrive and handed to the engine in batches.
//! The engine pulls: a batch goes out right away only while the engine is
//! waiting for its first frame or has reported that it is idle. Otherwise
//! the buffer remembers that data is pending and the next frame callback
//! releases it.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tracing::{debug, trace};

use nvrlink_decode::UNDERRUN_NOT_FIRST_FRAME;
use nvrlink_transport::StreamOpenMode;

/// Four-byte unit meaning "engine ready for more" rather than stream data.
pub const READY_UNIT: [u8; 4] = [1, 2, 3, 4];

/// Delay before retrying dispatch after an engine underrun.
pub const UNDERRUN_RETRY_DELAY: Duration = Duration::from_millis(5);

const LENGTH_PREFIX_LEN: usize = 4;

/// Stand-in batch sent while the engine reports overflow.
const OVERFLOW_FILLER: [u8; 1] = [0];

/// Why a chunk was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IngestRejection {
    /// Accepting the chunk would grow the buffer past its capacity.
    #[error("ingest buffer full: {buffered} of {capacity} bytes")]
    BufferFull { buffered: usize, capacity: usize },
}

/// What to do after the engine reported frame data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameAck {
    /// Send this batch now.
    Dispatch(Bytes),

    /// Call [`IngestBuffer::retry`] after the delay.
    RetryAfter(Duration),

    /// Nothing to send; the engine waits for data.
    Idle,
}

/// Bounded byte queue feeding the decode engine.
#[derive(Debug)]
pub struct IngestBuffer {
    buffer: BytesMut,
    lengths: VecDeque<usize>,
    capacity: usize,
    batch_target: usize,
    mode: StreamOpenMode,
    awaiting_first_frame: bool,
    engine_idle: bool,
    pending_ready: bool,
    overflow: bool,
    outstanding: usize,
}

impl IngestBuffer {
    /// Create an empty buffer. Nothing is dispatched until [`open`](Self::open).
    pub fn new(capacity: usize, batch_target: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            lengths: VecDeque::new(),
            capacity,
            batch_target,
            mode: StreamOpenMode::RawRtp,
            awaiting_first_frame: false,
            engine_idle: false,
            pending_ready: false,
            overflow: false,
            outstanding: 0,
        }
    }

    /// Reset for a freshly opened stream.
    pub fn open(&mut self, mode: StreamOpenMode) {
        self.buffer.clear();
        self.lengths.clear();
        self.mode = mode;
        self.awaiting_first_frame = true;
        self.engine_idle = false;
        self.pending_ready = false;
        self.overflow = false;
        self.outstanding = 0;
        debug!(?mode, capacity = self.capacity, "Ingest buffer opened");
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Maximum bytes held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffered bytes as a fraction of capacity.
    pub fn fullness(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        self.buffer.len() as f64 / self.capacity as f64
    }

    /// Chunks queued but not yet dispatched.
    pub fn pending_chunks(&self) -> usize {
        self.lengths.len()
    }

    /// Batches handed to the engine since it last produced a frame or
    /// asked for more data.
    pub fn outstanding_frames(&self) -> usize {
        self.outstanding
    }

    /// Whether the engine has not produced its first frame yet.
    pub fn is_awaiting_first_frame(&self) -> bool {
        self.awaiting_first_frame
    }

    /// Queue one unit from the socket.
    ///
    /// Returns the batch to send to the engine if it can take data now.
    pub fn push(&mut self, unit: &[u8]) -> Result<Option<Bytes>, IngestRejection> {
        if unit == READY_UNIT {
            trace!("Ready unit received");
            return Ok(self.release());
        }

        let stored = match self.mode {
            StreamOpenMode::FramedWithLengthPrefix => unit.len() + LENGTH_PREFIX_LEN,
            StreamOpenMode::RawRtp => unit.len(),
        };

        if self.buffer.len() + stored > self.capacity {
            self.overflow = true;
            return Err(IngestRejection::BufferFull {
                buffered: self.buffer.len(),
                capacity: self.capacity,
            });
        }

        if self.mode.is_framed() {
            self.buffer.put_u32_le(unit.len() as u32);
        }
        self.buffer.put_slice(unit);
        self.lengths.push_back(stored);

        Ok(self.release())
    }

    fn release(&mut self) -> Option<Bytes> {
        if self.awaiting_first_frame || self.engine_idle {
            Some(self.take_batch())
        } else {
            self.pending_ready = true;
            None
        }
    }

    /// Slice the next batch off the front of the buffer.
    ///
    /// Chunks are taken until the running total passes the batch target;
    /// the chunk that crosses it is included. While the engine is
    /// overflowing a one-byte filler is returned instead.
    fn take_batch(&mut self) -> Bytes {
        self.engine_idle = false;

        if self.overflow {
            return Bytes::from_static(&OVERFLOW_FILLER);
        }

        let mut total = 0;
        while let Some(len) = self.lengths.pop_front() {
            total += len;
            if total > self.batch_target {
                break;
            }
        }

        if total > 0 {
            self.outstanding += 1;
        }
        self.buffer.split_to(total).freeze()
    }

    /// Account for a frame-data callback from the engine.
    ///
    /// Overflow only clears once the engine reports an underrun; until then
    /// every callback answers with filler.
    pub fn on_frame_data(&mut self, error_code: i32, is_video: bool) -> FrameAck {
        if !self.awaiting_first_frame && error_code == UNDERRUN_NOT_FIRST_FRAME {
            debug!("Engine underrun, retrying dispatch");
            self.overflow = false;
            self.outstanding = 0;
            return FrameAck::RetryAfter(UNDERRUN_RETRY_DELAY);
        }

        if is_video {
            self.outstanding = 0;
            self.awaiting_first_frame = false;
        }

        if self.overflow {
            return FrameAck::Dispatch(self.take_batch());
        }

        if !is_video {
            return FrameAck::Idle;
        }

        if !self.lengths.is_empty() && self.pending_ready {
            self.pending_ready = false;
            FrameAck::Dispatch(self.take_batch())
        } else {
            self.engine_idle = true;
            FrameAck::Idle
        }
    }

    /// Dispatch after an underrun retry delay elapsed.
    pub fn retry(&mut self) -> Bytes {
        self.take_batch()
    }
}
