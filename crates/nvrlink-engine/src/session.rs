//! Stream session: the pipeline task and its public handle.
//!
//! One task owns the socket, the ingest buffer and the decode bridge. It
//! selects over socket events, decoder callbacks and commands from the
//! handle, so ingest state only ever has a single writer.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

use nvrlink_auth::{ControlApi, SessionAuthenticator};
use nvrlink_decode::{
    DecodeBridge, DecodeError, DecodeWorker, DecoderCallback, FrameKind, StillFormat,
    DECODE_POOL_SIZE, STREAM_HEAD_FRAME_SIZE,
};
use nvrlink_ipc::{
    ClientConfig, DecodeFrameMode, DecodedFrame, EventKind, StreamEvent, StreamMetrics,
    StreamState, StreamTarget, StreamTrigger,
};
use nvrlink_transport::{
    classify_chunk, classify_text, media_info_from_sdp, Connection, ControlCommand,
    InboundMessage, ReconnectPolicy, StreamConnector, StreamHead, TransportError, TransportEvent,
};

use crate::error::StreamError;
use crate::events::{EventBus, ListenerId};
use crate::ingest::{FrameAck, IngestBuffer, READY_UNIT};
use crate::metrics::MetricsCollector;
use crate::policy::DecodePolicy;
use crate::state::StreamStateMachine;
use crate::{StreamResult, SESSION_COMMAND_CAPACITY};

/// Supplies the stream URL for each (re)connect.
#[async_trait]
pub trait UrlProvider: Send + Sync + 'static {
    async fn stream_url(&self) -> StreamResult<String>;
}

#[async_trait]
impl<A: ControlApi + 'static> UrlProvider for Arc<SessionAuthenticator<A>> {
    async fn stream_url(&self) -> StreamResult<String> {
        Ok(self.as_ref().stream_url().await?)
    }
}

type Reply<T> = oneshot::Sender<StreamResult<T>>;

enum SessionCommand {
    Pause(Reply<()>),
    Resume(Reply<()>),
    ExportStill { format: StillFormat, reply: Reply<Bytes> },
    Destroy(oneshot::Sender<()>),
}

/// State shared between the handle and the pipeline task.
struct Shared {
    machine: StreamStateMachine,
    bus: EventBus,
    metrics: MetricsCollector,
    frames: RwLock<VecDeque<DecodedFrame>>,
    head: RwLock<Option<Bytes>>,
    frame_window: usize,
}

impl Shared {
    fn apply(&self, trigger: StreamTrigger) {
        if let Some(transition) = self.machine.apply(&trigger) {
            self.bus.dispatch(&StreamEvent::StateChanged {
                previous: transition.previous,
                current: transition.current,
            });
        }
    }

    fn emit(&self, event: StreamEvent) {
        self.bus.dispatch(&event);
    }

    fn push_frame(&self, frame: DecodedFrame) {
        let mut frames = self.frames.write();
        frames.push_back(frame);
        while frames.len() > self.frame_window {
            frames.pop_front();
        }
    }
}

/// Handle to one stream session.
///
/// Created idle; [`open`](Self::open) connects and starts the pipeline.
/// Dropping the handle without [`destroy`](Self::destroy) aborts the
/// pipeline task.
pub struct StreamSession {
    config: ClientConfig,
    shared: Arc<Shared>,
    commands: Option<mpsc::Sender<SessionCommand>>,
    task: Option<JoinHandle<()>>,
}

impl StreamSession {
    pub fn new(config: ClientConfig) -> Self {
        let shared = Arc::new(Shared {
            machine: StreamStateMachine::new(),
            bus: EventBus::new(),
            metrics: MetricsCollector::new(),
            frames: RwLock::new(VecDeque::with_capacity(config.frame_window + 1)),
            head: RwLock::new(None),
            frame_window: config.frame_window,
        });

        Self {
            config,
            shared,
            commands: None,
            task: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> StreamState {
        self.shared.machine.current()
    }

    /// Register a listener for `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.shared.bus.subscribe(kind, listener)
    }

    /// Remove a listener.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.bus.unsubscribe(id)
    }

    /// Receive all events on a bounded channel.
    pub fn events(&self) -> crossbeam_channel::Receiver<StreamEvent> {
        self.shared.bus.channel()
    }

    /// The most recent decoded frames, oldest first.
    pub fn recent_frames(&self) -> Vec<DecodedFrame> {
        self.shared.frames.read().iter().cloned().collect()
    }

    /// The head of the current stream, once seen.
    pub fn head(&self) -> Option<Bytes> {
        self.shared.head.read().clone()
    }

    /// Metrics snapshot.
    pub fn metrics(&self) -> StreamMetrics {
        self.shared.metrics.snapshot()
    }

    /// Connect and start streaming `target`.
    #[instrument(name = "session_open", skip_all, fields(channel = target.channel()))]
    pub async fn open<C, U, W>(
        &mut self,
        target: StreamTarget,
        connector: C,
        urls: U,
        worker: W,
    ) -> StreamResult<()>
    where
        C: StreamConnector + 'static,
        U: UrlProvider,
        W: DecodeWorker,
    {
        let state = self.state();
        if state != StreamState::Idle {
            return Err(StreamError::InvalidState {
                operation: "open",
                state: state.name(),
            });
        }

        self.shared.apply(StreamTrigger::Open);
        self.shared.metrics.start();

        let start = ControlCommand::for_target(
            &target,
            &self.config.host,
            self.config.ws_port,
            self.config.channel_offset,
        );

        let (bridge, callbacks) = DecodeBridge::spawn(worker);
        let connection = match connect_loaded(&bridge, &connector, &urls, &start).await {
            Ok(connection) => connection,
            Err(e) => {
                error!("Failed to open stream: {}", e);
                drop(bridge);
                self.shared.metrics.stop();
                self.shared.apply(StreamTrigger::Fault {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let (command_tx, command_rx) = mpsc::channel(SESSION_COMMAND_CAPACITY);
        let pipeline = Pipeline {
            connector,
            urls,
            start,
            recoverable: self.config.recoverable,
            reconnect: ReconnectPolicy::from(&self.config.reconnect),
            reconnect_attempt: 0,
            reconnect_at: None,
            connection: Some(connection),
            bridge,
            callbacks,
            commands: command_rx,
            shared: self.shared.clone(),
            ingest: IngestBuffer::new(self.config.ingest_capacity, self.config.batch_target),
            policy: DecodePolicy::default(),
            decode_mode: DecodeFrameMode::Full,
            retry_at: None,
        };

        self.task = Some(tokio::spawn(pipeline.run()));
        self.commands = Some(command_tx);
        info!("Stream session started");
        Ok(())
    }

    fn sender(&self, operation: &'static str) -> StreamResult<&mpsc::Sender<SessionCommand>> {
        match &self.commands {
            Some(commands) => Ok(commands),
            None => match self.state() {
                StreamState::Idle => Err(StreamError::InvalidState {
                    operation,
                    state: "Idle",
                }),
                _ => Err(StreamError::SessionClosed),
            },
        }
    }

    async fn request<T>(
        &self,
        operation: &'static str,
        make: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> StreamResult<T> {
        let commands = self.sender(operation)?;
        let (reply, rx) = oneshot::channel();
        commands
            .send(make(reply))
            .await
            .map_err(|_| StreamError::SessionClosed)?;
        rx.await.map_err(|_| StreamError::SessionClosed)?
    }

    /// Ask the device to pause delivery. Only legal while streaming.
    pub async fn pause(&self) -> StreamResult<()> {
        self.request("pause", SessionCommand::Pause).await
    }

    /// Ask the device to resume delivery. Only legal while paused.
    pub async fn resume(&self) -> StreamResult<()> {
        self.request("resume", SessionCommand::Resume).await
    }

    /// Export the latest decoded frame as a still image.
    ///
    /// Requests for the same format must not overlap; a newer one abandons
    /// the older.
    pub async fn export_still(&self, format: StillFormat) -> StreamResult<Bytes> {
        self.request("export", |reply| SessionCommand::ExportStill { format, reply })
            .await
    }

    /// Tear the session down. Never fails; problems are logged.
    ///
    /// No events are delivered after this returns.
    #[instrument(name = "session_destroy", skip(self))]
    pub async fn destroy(&mut self) {
        if let Some(commands) = self.commands.take() {
            let (done_tx, done_rx) = oneshot::channel();
            if commands.send(SessionCommand::Destroy(done_tx)).await.is_ok() {
                let _ = done_rx.await;
            }
        }

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Session task ended abnormally: {}", e);
            }
        }

        // The pipeline may have ended on its own or never started.
        if !self.state().is_terminal() {
            self.shared.apply(StreamTrigger::Destroy);
            self.shared.metrics.stop();
            self.shared.apply(StreamTrigger::Released);
        }

        self.shared.bus.clear();
        info!("Stream session destroyed");
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn connect_loaded<C: StreamConnector, U: UrlProvider>(
    bridge: &DecodeBridge,
    connector: &C,
    urls: &U,
    start: &ControlCommand,
) -> StreamResult<Connection> {
    bridge.wait_until_loaded().await?;
    establish(connector, urls, start).await
}

/// Fetch a URL, connect, and request the stream.
async fn establish<C: StreamConnector, U: UrlProvider>(
    connector: &C,
    urls: &U,
    start: &ControlCommand,
) -> StreamResult<Connection> {
    let url = urls.stream_url().await?;
    let connection = connector.connect(&url).await?;
    connection.send(start).await?;
    debug!(cmd = start.name(), "Stream requested");
    Ok(connection)
}

async fn next_event(connection: &mut Option<Connection>) -> Option<TransportEvent> {
    match connection {
        Some(connection) => connection.recv().await,
        None => std::future::pending().await,
    }
}

struct Pipeline<C, U> {
    connector: C,
    urls: U,
    start: ControlCommand,
    recoverable: bool,
    reconnect: ReconnectPolicy,
    reconnect_attempt: u32,
    reconnect_at: Option<Instant>,
    connection: Option<Connection>,
    bridge: DecodeBridge,
    callbacks: mpsc::UnboundedReceiver<DecoderCallback>,
    commands: mpsc::Receiver<SessionCommand>,
    shared: Arc<Shared>,
    ingest: IngestBuffer,
    policy: DecodePolicy,
    decode_mode: DecodeFrameMode,
    retry_at: Option<Instant>,
}

impl<C: StreamConnector, U: UrlProvider> Pipeline<C, U> {
    async fn run(mut self) {
        loop {
            let retry_at = self.retry_at;
            let reconnect_at = self.reconnect_at;

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Destroy(done)) => {
                        self.teardown();
                        let _ = done.send(());
                        return;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("Session handle dropped");
                        self.teardown();
                        return;
                    }
                },
                event = next_event(&mut self.connection) => self.handle_transport(event).await,
                Some(callback) = self.callbacks.recv() => self.handle_callback(callback).await,
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.retry_at = None;
                    let batch = self.ingest.retry();
                    self.dispatch(batch).await;
                }
                _ = sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    self.try_reconnect().await;
                }
            }

            let state = self.shared.machine.current();
            if matches!(state, StreamState::Closed | StreamState::Errored { .. }) {
                self.release();
                debug!(state = state.name(), "Pipeline finished");
                return;
            }
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Pause(reply) => {
                let result = self
                    .remote_control(ControlCommand::pause(), StreamTrigger::Pause, "pause")
                    .await;
                let _ = reply.send(result);
            }
            SessionCommand::Resume(reply) => {
                let result = self
                    .remote_control(ControlCommand::resume(), StreamTrigger::Resume, "resume")
                    .await;
                let _ = reply.send(result);
            }
            SessionCommand::ExportStill { format, reply } => self.export_still(format, reply).await,
            // Handled by the run loop.
            SessionCommand::Destroy(_) => {}
        }
    }

    async fn remote_control(
        &mut self,
        command: ControlCommand,
        trigger: StreamTrigger,
        operation: &'static str,
    ) -> StreamResult<()> {
        let state = self.shared.machine.current();
        let allowed = match trigger {
            StreamTrigger::Pause => state.is_streaming(),
            StreamTrigger::Resume => state.is_paused(),
            _ => false,
        };
        if !allowed {
            return Err(StreamError::InvalidState {
                operation,
                state: state.name(),
            });
        }

        let connection = self
            .connection
            .as_ref()
            .ok_or(StreamError::Transport(TransportError::NotConnected))?;
        connection.send(&command).await?;
        self.shared.apply(trigger);
        Ok(())
    }

    async fn export_still(&mut self, format: StillFormat, reply: Reply<Bytes>) {
        let frame = self.shared.frames.read().back().cloned();
        let Some(frame) = frame else {
            let _ = reply.send(Err(StreamError::NoFrame));
            return;
        };

        match self.bridge.request_still(format, frame).await {
            Ok(pending) => {
                tokio::spawn(async move {
                    let result = match pending.await {
                        Ok(result) => result.map_err(StreamError::from),
                        Err(_) => Err(StreamError::Decode(DecodeError::ExportAbandoned)),
                    };
                    let _ = reply.send(result);
                });
            }
            Err(e) => {
                let _ = reply.send(Err(e.into()));
            }
        }
    }

    async fn handle_transport(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Text(text)) => self.handle_text(&text).await,
            Some(TransportEvent::Binary(data)) => self.handle_binary(data).await,
            Some(TransportEvent::Closed { reason }) => self.handle_closed(reason),
            None => self.handle_closed("connection dropped".to_string()),
        }
    }

    async fn handle_text(&mut self, text: &str) {
        match classify_text(text) {
            Ok(InboundMessage::Handshake) => debug!("Stream handshake acknowledged"),
            Ok(InboundMessage::Sdp(sdp)) => match media_info_from_sdp(&sdp) {
                Some(head) => self.handle_head(head).await,
                None => warn!("SDP without usable media info"),
            },
            Ok(other) => debug!(?other, "Control message ignored"),
            Err(e) => warn!("Unreadable text message: {}", e),
        }
    }

    async fn handle_binary(&mut self, data: Bytes) {
        self.shared.metrics.record_bytes_received(data.len() as u64);

        let chunk = classify_chunk(data);
        self.shared.emit(StreamEvent::RawData(chunk.data.clone()));

        if chunk.is_head {
            self.handle_head(chunk.data).await;
        } else {
            self.handle_payload(chunk.data).await;
        }
    }

    async fn handle_head(&mut self, bytes: Bytes) {
        let state = self.shared.machine.current();
        if state.is_streaming() || state.is_paused() {
            trace!(len = bytes.len(), "Stream already open, head-shaped chunk is payload");
            self.handle_payload(bytes).await;
            return;
        }

        self.shared.apply(StreamTrigger::MediaInfo);

        let head = match StreamHead::from_bytes(bytes) {
            Ok(head) => head,
            Err(e) => {
                self.fail(e.into());
                return;
            }
        };
        *self.shared.head.write() = Some(head.bytes().clone());

        self.ingest.open(head.open_mode());
        self.decode_mode = DecodeFrameMode::Full;

        if let Err(e) = self.open_decoder(&head).await {
            self.fail(e);
            return;
        }

        self.shared.apply(StreamTrigger::StreamOpened);
    }

    async fn open_decoder(&self, head: &StreamHead) -> StreamResult<()> {
        let mode = head.open_mode();
        self.bridge.set_stream_open_mode(mode.engine_value()).await?;
        self.bridge
            .open_stream(head.bytes().clone(), STREAM_HEAD_FRAME_SIZE, DECODE_POOL_SIZE)
            .await?;
        self.bridge
            .set_input_buffer_cap(self.ingest.capacity())
            .await?;
        info!(?mode, "Stream opened in decode engine");
        Ok(())
    }

    async fn handle_payload(&mut self, data: Bytes) {
        let state = self.shared.machine.current();
        if !(state.is_streaming() || state.is_paused()) {
            debug!(len = data.len(), "Payload before stream head dropped");
            return;
        }

        let outcome = self.policy.evaluate(
            self.decode_mode,
            self.ingest.fullness(),
            self.ingest.outstanding_frames(),
        );

        if outcome.mode != self.decode_mode {
            match self.bridge.set_decode_frame_mode(outcome.mode).await {
                Ok(()) => {
                    debug!(mode = ?outcome.mode, "Decode frame mode changed");
                    self.decode_mode = outcome.mode;
                }
                Err(e) => warn!("Failed to change decode frame mode: {}", e),
            }
        }

        let unit = if outcome.substitute_ready_unit {
            self.shared.metrics.record_chunk_throttled();
            Bytes::from_static(&READY_UNIT)
        } else {
            data
        };

        match self.ingest.push(&unit) {
            Ok(batch) => {
                if unit.as_ref() != READY_UNIT {
                    self.shared.metrics.record_chunk_ingested();
                }
                if let Some(batch) = batch {
                    self.dispatch(batch).await;
                }
            }
            Err(rejection) => {
                self.shared.metrics.record_chunk_rejected();
                debug!("Chunk rejected: {}", rejection);
            }
        }

        self.update_fullness();
    }

    async fn dispatch(&self, batch: Bytes) {
        trace!(len = batch.len(), "Dispatching input");
        if let Err(e) = self.bridge.input_data(batch).await {
            warn!("Input not delivered to decode engine: {}", e);
        }
    }

    async fn handle_callback(&mut self, callback: DecoderCallback) {
        match callback {
            DecoderCallback::Loaded => debug!("Decode engine loaded"),
            DecoderCallback::FrameData {
                error_code,
                kind,
                frame,
            } => {
                match self
                    .ingest
                    .on_frame_data(error_code, kind == FrameKind::Video)
                {
                    FrameAck::Dispatch(batch) => self.dispatch(batch).await,
                    FrameAck::RetryAfter(delay) => self.retry_at = Some(Instant::now() + delay),
                    FrameAck::Idle => {}
                }

                if let (FrameKind::Video, Some(frame)) = (kind, frame) {
                    self.shared.metrics.record_frame();
                    self.shared.push_frame(frame.clone());
                    self.shared.emit(StreamEvent::Video(frame));
                }

                self.update_fullness();
            }
            // Resolved inside the bridge.
            DecoderCallback::Still { .. } => {}
        }
    }

    fn update_fullness(&self) {
        self.shared
            .metrics
            .update_buffer_fullness((self.ingest.fullness() * 100.0) as f32);
    }

    fn handle_closed(&mut self, reason: String) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        self.retry_at = None;

        if !self.recoverable {
            warn!("Stream connection closed: {}", reason);
            self.shared
                .apply(StreamTrigger::TransportClosed { recoverable: false });
            self.shared.emit(StreamEvent::Close { reason });
            return;
        }

        info!("Stream connection lost, reconnecting: {}", reason);
        self.shared
            .apply(StreamTrigger::TransportClosed { recoverable: true });
        self.schedule_reconnect(reason);
    }

    fn schedule_reconnect(&mut self, reason: String) {
        if !self.reconnect.should_retry(self.reconnect_attempt) {
            let exhausted = TransportError::ReconnectExhausted(self.reconnect_attempt);
            warn!("{} (last error: {})", exhausted, reason);
            self.shared
                .apply(StreamTrigger::TransportClosed { recoverable: false });
            self.shared.emit(StreamEvent::Close {
                reason: exhausted.to_string(),
            });
            return;
        }

        self.reconnect_attempt += 1;
        let delay = self.reconnect.delay_for_attempt(self.reconnect_attempt);
        debug!(attempt = self.reconnect_attempt, ?delay, "Reconnect scheduled");
        self.reconnect_at = Some(Instant::now() + delay);
    }

    async fn try_reconnect(&mut self) {
        match establish(&self.connector, &self.urls, &self.start).await {
            Ok(connection) => {
                info!(attempt = self.reconnect_attempt, "Stream reconnected");
                self.connection = Some(connection);
                self.reconnect_attempt = 0;
                self.shared.metrics.record_reconnect();
            }
            Err(e) => {
                warn!(attempt = self.reconnect_attempt, "Reconnect failed: {}", e);
                self.schedule_reconnect(e.to_string());
            }
        }
    }

    fn fail(&mut self, err: StreamError) {
        error!("Stream session failed: {}", err);
        let message = err.to_string();
        self.shared.apply(StreamTrigger::Fault {
            message: message.clone(),
        });
        self.shared.emit(StreamEvent::Close { reason: message });
    }

    /// Close the socket and stop the decode engine.
    fn release(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        self.bridge.terminate();
        self.retry_at = None;
        self.reconnect_at = None;
        self.shared.metrics.stop();
    }

    #[instrument(name = "session_teardown", skip(self))]
    fn teardown(&mut self) {
        self.shared.apply(StreamTrigger::Destroy);
        self.release();
        self.shared.apply(StreamTrigger::Released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_operations_before_open() {
        let session = StreamSession::new(ClientConfig::default());
        assert_eq!(session.state(), StreamState::Idle);

        assert!(matches!(
            session.pause().await,
            Err(StreamError::InvalidState {
                operation: "pause",
                state: "Idle"
            })
        ));
        assert!(session.head().is_none());
        assert!(session.recent_frames().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_idle_session() {
        let mut session = StreamSession::new(ClientConfig::default());
        let rx = session.events();

        session.destroy().await;
        assert_eq!(session.state(), StreamState::Closed);

        let states: Vec<_> = rx
            .try_iter()
            .filter_map(|event| match event {
                StreamEvent::StateChanged { current, .. } => Some(current),
                _ => None,
            })
            .collect();
        assert_eq!(states, vec![StreamState::Closing, StreamState::Closed]);

        assert!(matches!(
            session.resume().await,
            Err(StreamError::SessionClosed)
        ));
    }

    #[test]
    fn test_frame_window_is_bounded() {
        let session = StreamSession::new(ClientConfig::default());
        for i in 0..5u32 {
            session.shared.push_frame(DecodedFrame {
                data: Bytes::new(),
                width: i,
                height: i,
                osd_time: String::new(),
            });
        }
        let widths: Vec<_> = session.recent_frames().iter().map(|f| f.width).collect();
        assert_eq!(widths, vec![2, 3, 4]);
    }
}
