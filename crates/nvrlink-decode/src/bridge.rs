//! The decode bridge actor.
//!
//! Commands travel to the worker task over a bounded channel. Callbacks come
//! back on a separate channel, except still exports which resolve the
//! oneshot handed out when they were requested.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use nvrlink_ipc::{DecodeFrameMode, DecodedFrame};

use crate::error::DecodeError;
use crate::protocol::{DecoderCallback, DecoderCommand, StillFormat};
use crate::worker::DecodeWorker;
use crate::{DecodeResult, COMMAND_CHANNEL_CAPACITY};

type StillReply = oneshot::Sender<DecodeResult<Bytes>>;

enum Request {
    Command(DecoderCommand),
    Export {
        format: StillFormat,
        frame: DecodedFrame,
        reply: StillReply,
    },
}

/// Handle to a running decode worker.
///
/// Dropping the handle terminates the worker.
pub struct DecodeBridge {
    requests: mpsc::Sender<Request>,
    loaded: watch::Receiver<bool>,
    task: Option<JoinHandle<()>>,
    worker_name: &'static str,
}

impl DecodeBridge {
    /// Start `worker` on its own task.
    ///
    /// Returns the handle and the receiver for engine callbacks.
    pub fn spawn<W: DecodeWorker>(worker: W) -> (Self, mpsc::UnboundedReceiver<DecoderCallback>) {
        let (request_tx, request_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (callback_tx, callback_rx) = mpsc::unbounded_channel();
        let (loaded_tx, loaded_rx) = watch::channel(false);
        let worker_name = worker.name();

        let task = tokio::spawn(run_worker(worker, request_rx, callback_tx, loaded_tx));
        info!(worker = worker_name, "Decode worker spawned");

        let bridge = Self {
            requests: request_tx,
            loaded: loaded_rx,
            task: Some(task),
            worker_name,
        };
        (bridge, callback_rx)
    }

    /// Worker name for diagnostics.
    pub fn worker_name(&self) -> &'static str {
        self.worker_name
    }

    /// Whether the engine reported `loaded` and has not been terminated.
    pub fn is_loaded(&self) -> bool {
        self.task.is_some() && *self.loaded.borrow()
    }

    /// Wait until the engine reports `loaded`.
    pub async fn wait_until_loaded(&self) -> DecodeResult<()> {
        let mut loaded = self.loaded.clone();
        loaded
            .wait_for(|loaded| *loaded)
            .await
            .map(|_| ())
            .map_err(|_| DecodeError::EngineUnavailable)
    }

    async fn send(&self, command: DecoderCommand) -> DecodeResult<()> {
        if !self.is_loaded() {
            return Err(DecodeError::EngineUnavailable);
        }
        self.requests
            .send(Request::Command(command))
            .await
            .map_err(|_| DecodeError::ChannelClosed)
    }

    /// Open a stream from its head.
    pub async fn open_stream(
        &self,
        head: Bytes,
        frame_size: usize,
        pool_size: usize,
    ) -> DecodeResult<()> {
        if head.is_empty() || frame_size == 0 || pool_size == 0 {
            return Err(DecodeError::InvalidInput(format!(
                "open stream with head {} bytes, frame size {}, pool {}",
                head.len(),
                frame_size,
                pool_size
            )));
        }
        self.send(DecoderCommand::OpenStream {
            head,
            frame_size,
            pool_size,
        })
        .await
    }

    /// Select the stream open mode by engine value.
    pub async fn set_stream_open_mode(&self, mode: u8) -> DecodeResult<()> {
        self.send(DecoderCommand::SetStreamOpenMode(mode)).await
    }

    /// Cap the engine's input buffer.
    pub async fn set_input_buffer_cap(&self, bytes: usize) -> DecodeResult<()> {
        self.send(DecoderCommand::SetInputBufferCap(bytes)).await
    }

    /// Select full or reduced frame decoding.
    pub async fn set_decode_frame_mode(&self, mode: DecodeFrameMode) -> DecodeResult<()> {
        self.send(DecoderCommand::SetDecodeFrameType(mode.engine_value()))
            .await
    }

    /// Feed stream bytes.
    pub async fn input_data(&self, data: Bytes) -> DecodeResult<()> {
        self.send(DecoderCommand::InputData(data)).await
    }

    /// Queue a still export and return the receiver for its result.
    ///
    /// A newer request for the same format abandons the older one.
    pub async fn request_still(
        &self,
        format: StillFormat,
        frame: DecodedFrame,
    ) -> DecodeResult<oneshot::Receiver<DecodeResult<Bytes>>> {
        if !self.is_loaded() {
            return Err(DecodeError::EngineUnavailable);
        }
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Export {
                format,
                frame,
                reply,
            })
            .await
            .map_err(|_| DecodeError::ChannelClosed)?;
        Ok(rx)
    }

    /// Export `frame` as a still image.
    pub async fn export_still(
        &self,
        format: StillFormat,
        frame: DecodedFrame,
    ) -> DecodeResult<Bytes> {
        let rx = self.request_still(format, frame).await?;
        rx.await.map_err(|_| DecodeError::ExportAbandoned)?
    }

    /// Stop the worker. No callbacks are produced afterwards and pending
    /// exports resolve to `ExportAbandoned`.
    #[instrument(name = "decode_terminate", skip(self), fields(worker = self.worker_name))]
    pub fn terminate(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Decode worker terminated");
        }
    }
}

impl Drop for DecodeBridge {
    fn drop(&mut self) {
        self.terminate();
    }
}

async fn run_worker<W: DecodeWorker>(
    mut worker: W,
    mut requests: mpsc::Receiver<Request>,
    callbacks: mpsc::UnboundedSender<DecoderCallback>,
    loaded: watch::Sender<bool>,
) {
    let mut pending: HashMap<StillFormat, StillReply> = HashMap::new();

    match worker.start() {
        Ok(started) => {
            if !deliver(started, &callbacks, &loaded, &mut pending) {
                return;
            }
        }
        Err(e) => {
            error!(worker = worker.name(), "Decode worker failed to start: {}", e);
            return;
        }
    }

    while let Some(request) = requests.recv().await {
        let command = match request {
            Request::Command(command) => command,
            Request::Export {
                format,
                frame,
                reply,
            } => {
                if let Some(previous) = pending.insert(format, reply) {
                    debug!(format = format.function(), "Superseding pending export");
                    let _ = previous.send(Err(DecodeError::ExportAbandoned));
                }
                DecoderCommand::ExportStill { format, frame }
            }
        };

        let name = command.name();
        match worker.handle(command) {
            Ok(produced) => {
                if !deliver(produced, &callbacks, &loaded, &mut pending) {
                    break;
                }
            }
            Err(e) => warn!(command = name, "Decode worker rejected command: {}", e),
        }
    }

    debug!("Decode worker task finished");
}

/// Route callbacks. Returns false once nobody listens anymore.
fn deliver(
    produced: Vec<DecoderCallback>,
    callbacks: &mpsc::UnboundedSender<DecoderCallback>,
    loaded: &watch::Sender<bool>,
    pending: &mut HashMap<StillFormat, StillReply>,
) -> bool {
    for callback in produced {
        match callback {
            DecoderCallback::Still { format, data } => {
                match pending.remove(&format) {
                    Some(reply) => {
                        let _ = reply.send(Ok(data));
                    }
                    None => debug!(format = format.function(), "Unrequested still dropped"),
                }
                continue;
            }
            DecoderCallback::Loaded => {
                loaded.send_replace(true);
            }
            DecoderCallback::FrameData { .. } => {}
        }

        if callbacks.send(callback).is_err() {
            debug!("Callback receiver dropped");
            return false;
        }
    }
    true
}
