//! End-to-end session tests over an in-memory transport and decode worker.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use nvrlink_decode::{
    DecodeResult, DecodeWorker, DecoderCallback, DecoderCommand, FrameKind, NullWorker,
    StillFormat, UNDERRUN_NOT_FIRST_FRAME,
};
use nvrlink_engine::{StreamError, StreamResult, StreamSession, UrlProvider};
use nvrlink_ipc::{ClientConfig, DecodedFrame, EventKind, StreamEvent, StreamState, StreamTarget};
use nvrlink_transport::{
    Connection, StreamConnector, TransportError, TransportEvent, TransportResult, HEAD_MAGIC,
};

const WAIT: Duration = Duration::from_secs(2);

/// Device side of one in-memory connection.
struct Device {
    inbound: mpsc::Sender<TransportEvent>,
    outbound: mpsc::Receiver<String>,
}

impl Device {
    async fn send_binary(&self, data: Vec<u8>) {
        self.inbound
            .send(TransportEvent::Binary(Bytes::from(data)))
            .await
            .unwrap();
    }

    async fn send_text(&self, text: &str) {
        self.inbound
            .send(TransportEvent::Text(text.to_string()))
            .await
            .unwrap();
    }

    async fn close(&self, reason: &str) {
        self.inbound
            .send(TransportEvent::Closed {
                reason: reason.to_string(),
            })
            .await
            .unwrap();
    }

    async fn next_command(&mut self) -> String {
        tokio::time::timeout(WAIT, self.outbound.recv())
            .await
            .expect("no command sent")
            .expect("outbound closed")
    }
}

#[derive(Clone, Default)]
struct MemoryConnector {
    connections: Arc<Mutex<VecDeque<Connection>>>,
    urls: Arc<Mutex<Vec<String>>>,
}

impl MemoryConnector {
    fn with_devices(count: usize) -> (Self, Vec<Device>) {
        let connector = Self::default();
        let mut devices = Vec::new();
        for _ in 0..count {
            let (out_tx, out_rx) = mpsc::channel(16);
            let (in_tx, in_rx) = mpsc::channel(64);
            connector
                .connections
                .lock()
                .push_back(Connection::from_channels(out_tx, in_rx));
            devices.push(Device {
                inbound: in_tx,
                outbound: out_rx,
            });
        }
        (connector, devices)
    }
}

#[async_trait]
impl StreamConnector for MemoryConnector {
    async fn connect(&self, url: &str) -> TransportResult<Connection> {
        self.urls.lock().push(url.to_string());
        self.connections
            .lock()
            .pop_front()
            .ok_or_else(|| TransportError::ConnectionFailed("device unreachable".to_string()))
    }
}

struct StaticUrl;

#[async_trait]
impl UrlProvider for StaticUrl {
    async fn stream_url(&self) -> StreamResult<String> {
        Ok("ws://nvr:7681/?version=1.0&cipherSuites=1&sessionID=abc".to_string())
    }
}

/// Records every command and answers input with a video frame.
#[derive(Clone, Default)]
struct RecordingWorker {
    commands: Arc<Mutex<Vec<DecoderCommand>>>,
}

impl RecordingWorker {
    fn commands(&self) -> Vec<DecoderCommand> {
        self.commands.lock().clone()
    }

    fn input_lengths(&self) -> Vec<usize> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                DecoderCommand::InputData(data) => Some(data.len()),
                _ => None,
            })
            .collect()
    }
}

impl DecodeWorker for RecordingWorker {
    fn handle(&mut self, command: DecoderCommand) -> DecodeResult<Vec<DecoderCallback>> {
        self.commands.lock().push(command.clone());
        Ok(match command {
            DecoderCommand::InputData(data) => vec![DecoderCallback::FrameData {
                error_code: 0,
                kind: FrameKind::Video,
                frame: Some(DecodedFrame {
                    data,
                    width: 704,
                    height: 576,
                    osd_time: "2024-03-01 08:00:00".to_string(),
                }),
            }],
            DecoderCommand::ExportStill { format, .. } => vec![DecoderCallback::Still {
                format,
                data: Bytes::from_static(b"still"),
            }],
            _ => Vec::new(),
        })
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

fn video_frame(data: Bytes) -> DecoderCallback {
    DecoderCallback::FrameData {
        error_code: 0,
        kind: FrameKind::Video,
        frame: Some(DecodedFrame {
            data,
            width: 704,
            height: 576,
            osd_time: "2024-03-01 08:00:00".to_string(),
        }),
    }
}

fn underrun() -> DecoderCallback {
    DecoderCallback::FrameData {
        error_code: UNDERRUN_NOT_FIRST_FRAME,
        kind: FrameKind::Other,
        frame: None,
    }
}

/// Answers the n-th input (counted from 1) with `script(n)`.
#[derive(Clone)]
struct ScriptedWorker {
    inputs: Arc<Mutex<Vec<Bytes>>>,
    script: fn(usize) -> Vec<DecoderCallback>,
}

impl ScriptedWorker {
    fn new(script: fn(usize) -> Vec<DecoderCallback>) -> Self {
        Self {
            inputs: Arc::new(Mutex::new(Vec::new())),
            script,
        }
    }

    fn input_lengths(&self) -> Vec<usize> {
        self.inputs.lock().iter().map(Bytes::len).collect()
    }
}

impl DecodeWorker for ScriptedWorker {
    fn handle(&mut self, command: DecoderCommand) -> DecodeResult<Vec<DecoderCallback>> {
        Ok(match command {
            DecoderCommand::InputData(data) => {
                let mut inputs = self.inputs.lock();
                inputs.push(data);
                (self.script)(inputs.len())
            }
            _ => Vec::new(),
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

async fn open_live(
    config: ClientConfig,
    worker: impl DecodeWorker,
) -> (StreamSession, Device) {
    let (connector, mut devices) = MemoryConnector::with_devices(1);
    let mut device = devices.remove(0);
    let mut session = StreamSession::new(config);
    session
        .open(StreamTarget::RealPlay { channel: 1 }, connector, StaticUrl, worker)
        .await
        .unwrap();
    device.next_command().await;
    (session, device)
}

fn framed_head() -> Vec<u8> {
    let mut head = vec![0u8; 40];
    head[..4].copy_from_slice(&HEAD_MAGIC);
    head[8] = 4;
    head
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn record_states(session: &StreamSession) -> Arc<Mutex<Vec<StreamState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    session.subscribe(EventKind::StateChanged, move |event| {
        if let StreamEvent::StateChanged { current, .. } = event {
            sink.lock().push(current.clone());
        }
    });
    states
}

#[tokio::test]
async fn test_live_session_feeds_decoder_in_order() {
    let (connector, mut devices) = MemoryConnector::with_devices(1);
    let mut device = devices.remove(0);
    let worker = RecordingWorker::default();

    let mut session = StreamSession::new(ClientConfig::default());
    let states = record_states(&session);

    session
        .open(
            StreamTarget::RealPlay { channel: 1 },
            connector.clone(),
            StaticUrl,
            worker.clone(),
        )
        .await
        .unwrap();

    assert_eq!(
        device.next_command().await,
        r#"{"sequence":0,"cmd":"realplay","url":"live://192.168.1.64:7681/33/1"}"#
    );
    assert_eq!(session.state(), StreamState::AwaitingHandshake);

    // Payload before the head is dropped.
    device.send_binary(vec![7u8; 30]).await;

    device.send_binary(framed_head()).await;
    for len in [100, 200, 50] {
        device.send_binary(vec![1u8; len]).await;
    }

    eventually(|| worker.input_lengths().len() == 3).await;
    assert_eq!(worker.input_lengths(), vec![104, 204, 54]);

    let commands = worker.commands();
    let opens: Vec<_> = commands
        .iter()
        .filter(|c| matches!(c, DecoderCommand::OpenStream { .. }))
        .collect();
    assert_eq!(opens.len(), 1);
    assert_eq!(commands[0], DecoderCommand::SetStreamOpenMode(0));
    match &commands[1] {
        DecoderCommand::OpenStream {
            head,
            frame_size,
            pool_size,
        } => {
            assert_eq!(head.len(), 40);
            assert_eq!(*frame_size, 40);
            assert_eq!(*pool_size, 2 * 1024 * 1024);
        }
        other => panic!("unexpected command: {other:?}"),
    }

    assert_eq!(
        *states.lock(),
        vec![
            StreamState::AwaitingHandshake,
            StreamState::AwaitingHead,
            StreamState::Streaming
        ]
    );
    assert_eq!(session.head().map(|h| h.len()), Some(40));

    eventually(|| session.recent_frames().len() == 3).await;
    let still = session.export_still(StillFormat::Jpeg).await.unwrap();
    assert_eq!(still, Bytes::from_static(b"still"));

    let metrics = session.metrics();
    assert_eq!(metrics.bytes_received, 30 + 40 + 350);
    assert_eq!(metrics.chunks_ingested, 3);
    assert_eq!(metrics.frames_decoded, 3);

    session.destroy().await;
    assert_eq!(session.state(), StreamState::Closed);
    assert!(device.outbound.recv().await.is_none());
}

#[tokio::test]
async fn test_pause_only_from_streaming() {
    let (connector, mut devices) = MemoryConnector::with_devices(1);
    let mut device = devices.remove(0);

    let mut session = StreamSession::new(ClientConfig::default());
    session
        .open(
            StreamTarget::RealPlay { channel: 1 },
            connector,
            StaticUrl,
            RecordingWorker::default(),
        )
        .await
        .unwrap();
    device.next_command().await;

    assert!(matches!(
        session.pause().await,
        Err(StreamError::InvalidState {
            operation: "pause",
            state: "AwaitingHandshake"
        })
    ));

    device.send_binary(framed_head()).await;
    eventually(|| session.state() == StreamState::Streaming).await;

    session.pause().await.unwrap();
    assert_eq!(device.next_command().await, r#"{"sequence":0,"cmd":"pause"}"#);
    assert_eq!(session.state(), StreamState::Paused);

    assert!(matches!(
        session.pause().await,
        Err(StreamError::InvalidState { .. })
    ));

    session.resume().await.unwrap();
    assert_eq!(device.next_command().await, r#"{"sequence":0,"cmd":"resume"}"#);
    assert_eq!(session.state(), StreamState::Streaming);

    session.destroy().await;
}

#[tokio::test]
async fn test_destroy_silences_listeners() {
    let (connector, mut devices) = MemoryConnector::with_devices(1);
    let device = devices.remove(0);
    let worker = RecordingWorker::default();

    let mut session = StreamSession::new(ClientConfig::default());
    let raw = Arc::new(Mutex::new(0usize));
    let counter = raw.clone();
    session.subscribe(EventKind::RawData, move |_| *counter.lock() += 1);

    session
        .open(
            StreamTarget::RealPlay { channel: 1 },
            connector,
            StaticUrl,
            worker.clone(),
        )
        .await
        .unwrap();

    device.send_binary(framed_head()).await;
    eventually(|| *raw.lock() == 1).await;

    session.destroy().await;
    assert_eq!(session.state(), StreamState::Closed);

    let seen = worker.commands().len();
    // The receiving side is gone; nothing reaches listeners or the engine.
    let _ = device
        .inbound
        .send(TransportEvent::Binary(Bytes::from(vec![1u8; 100])))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(*raw.lock(), 1);
    assert_eq!(worker.commands().len(), seen);
    assert!(matches!(
        session.export_still(StillFormat::Bmp).await,
        Err(StreamError::SessionClosed)
    ));
}

#[tokio::test]
async fn test_unrecoverable_close_emits_close() {
    let (connector, mut devices) = MemoryConnector::with_devices(1);
    let device = devices.remove(0);

    let mut session = StreamSession::new(ClientConfig::default());
    let events = session.events();

    session
        .open(
            StreamTarget::RealPlay { channel: 1 },
            connector,
            StaticUrl,
            RecordingWorker::default(),
        )
        .await
        .unwrap();

    device.close("websocket").await;

    let mut reasons = Vec::new();
    eventually(|| {
        reasons.extend(events.try_iter().filter_map(|event| match event {
            StreamEvent::Close { reason } => Some(reason),
            _ => None,
        }));
        !reasons.is_empty()
    })
    .await;
    assert_eq!(reasons, vec!["websocket".to_string()]);
    assert_eq!(session.state(), StreamState::Closed);

    session.destroy().await;
    assert_eq!(session.state(), StreamState::Closed);
}

#[tokio::test]
async fn test_recoverable_close_reconnects() {
    let (connector, mut devices) = MemoryConnector::with_devices(2);
    let mut second = devices.remove(1);
    let first = devices.remove(0);

    let mut config = ClientConfig::default();
    config.recoverable = true;
    config.reconnect.base_delay_ms = 10;

    let mut session = StreamSession::new(config);
    let events = session.events();
    session
        .open(
            StreamTarget::RealPlay { channel: 1 },
            connector.clone(),
            StaticUrl,
            RecordingWorker::default(),
        )
        .await
        .unwrap();

    first.send_binary(framed_head()).await;
    eventually(|| session.state() == StreamState::Streaming).await;

    first.close("network").await;
    assert!(second.next_command().await.contains(r#""cmd":"realplay""#));
    eventually(|| session.metrics().reconnects == 1).await;
    assert_eq!(session.state(), StreamState::AwaitingHandshake);
    assert_eq!(connector.urls.lock().len(), 2);

    second.send_binary(framed_head()).await;
    eventually(|| session.state() == StreamState::Streaming).await;

    assert!(!events
        .try_iter()
        .any(|event| matches!(event, StreamEvent::Close { .. })));

    session.destroy().await;
}

#[tokio::test]
async fn test_reconnect_exhaustion_closes() {
    let (connector, mut devices) = MemoryConnector::with_devices(1);
    let first = devices.remove(0);

    let mut config = ClientConfig::default();
    config.recoverable = true;
    config.reconnect.max_attempts = 2;
    config.reconnect.base_delay_ms = 5;

    let mut session = StreamSession::new(config);
    let events = session.events();
    session
        .open(
            StreamTarget::RealPlay { channel: 1 },
            connector.clone(),
            StaticUrl,
            RecordingWorker::default(),
        )
        .await
        .unwrap();

    first.close("network").await;
    let mut reasons = Vec::new();
    eventually(|| {
        reasons.extend(events.try_iter().filter_map(|event| match event {
            StreamEvent::Close { reason } => Some(reason),
            _ => None,
        }));
        !reasons.is_empty()
    })
    .await;

    assert_eq!(
        reasons,
        vec!["Reconnect attempts exhausted after 2 attempts".to_string()]
    );
    assert_eq!(session.state(), StreamState::Closed);
    // Initial connect plus two failed attempts.
    assert_eq!(connector.urls.lock().len(), 3);

    session.destroy().await;
}

#[tokio::test]
async fn test_open_failure_errors_session() {
    let (connector, _) = MemoryConnector::with_devices(0);

    let mut session = StreamSession::new(ClientConfig::default());
    let result = session
        .open(
            StreamTarget::RealPlay { channel: 1 },
            connector,
            StaticUrl,
            RecordingWorker::default(),
        )
        .await;

    assert!(matches!(
        result,
        Err(StreamError::Transport(TransportError::ConnectionFailed(_)))
    ));
    assert!(matches!(session.state(), StreamState::Errored { .. }));

    session.destroy().await;
    assert_eq!(session.state(), StreamState::Closed);
}

#[tokio::test]
async fn test_sdp_media_info_opens_stream() {
    let worker = RecordingWorker::default();
    let (mut session, device) = open_live(ClientConfig::default(), worker.clone()).await;
    let states = record_states(&session);

    device
        .send_text(r#"{"version":"1.0","cipherSuite":0}"#)
        .await;
    let media_info: String = framed_head().iter().map(|b| format!("{b:02X}")).collect();
    let sdp = format!(
        r#"{{"sdp":"v=0\r\nm=video 0 RTP/AVP 96\r\na=MEDIAINFO={media_info}\r\n"}}"#
    );
    device.send_text(&sdp).await;

    eventually(|| session.state() == StreamState::Streaming).await;
    assert_eq!(session.head(), Some(Bytes::from(framed_head())));
    assert_eq!(
        *states.lock(),
        vec![StreamState::AwaitingHead, StreamState::Streaming]
    );

    device.send_binary(vec![1u8; 100]).await;
    eventually(|| worker.input_lengths() == vec![104]).await;

    session.destroy().await;
}

#[tokio::test]
async fn test_late_head_shaped_chunk_is_payload() {
    let worker = RecordingWorker::default();
    let (mut session, device) = open_live(ClientConfig::default(), worker.clone()).await;

    device.send_binary(framed_head()).await;
    eventually(|| session.state() == StreamState::Streaming).await;

    // Payload that happens to start with the head magic.
    device.send_binary(framed_head()).await;
    eventually(|| worker.input_lengths() == vec![44]).await;

    let opens = worker
        .commands()
        .iter()
        .filter(|c| matches!(c, DecoderCommand::OpenStream { .. }))
        .count();
    assert_eq!(opens, 1);
    assert_eq!(session.metrics().chunks_ingested, 1);

    session.destroy().await;
}

#[tokio::test]
async fn test_frames_spanning_batches_keep_data_flowing() {
    // A frame every third input; the engine asks for more in between.
    let worker = ScriptedWorker::new(|n| {
        if n % 3 == 0 {
            vec![video_frame(Bytes::from_static(b"yuv"))]
        } else {
            vec![underrun()]
        }
    });
    let (mut session, device) = open_live(ClientConfig::default(), worker.clone()).await;

    device.send_binary(framed_head()).await;
    for _ in 0..3 {
        device.send_binary(vec![1u8; 6000]).await;
    }
    eventually(|| session.metrics().frames_decoded == 1).await;

    for _ in 0..200 {
        device.send_binary(vec![2u8; 6000]).await;
    }
    eventually(|| {
        let m = session.metrics();
        m.chunks_ingested + m.chunks_throttled + m.chunks_rejected == 203
    })
    .await;

    let metrics = session.metrics();
    assert_eq!(metrics.chunks_ingested, 203);
    assert_eq!(metrics.chunks_throttled, 0);
    assert_eq!(metrics.chunks_rejected, 0);

    eventually(|| session.metrics().frames_decoded >= 3).await;
    assert!(worker.input_lengths().iter().all(|len| *len <= 6004));

    session.destroy().await;
}

#[tokio::test]
async fn test_null_worker_accepts_every_chunk() {
    let (mut session, device) = open_live(ClientConfig::default(), NullWorker::new()).await;

    device.send_binary(framed_head()).await;
    eventually(|| session.state() == StreamState::Streaming).await;

    for sent in 1..=50 {
        device.send_binary(vec![1u8; 100]).await;
        eventually(|| {
            let m = session.metrics();
            m.chunks_ingested + m.chunks_throttled == sent
        })
        .await;
    }

    let metrics = session.metrics();
    assert_eq!(metrics.chunks_ingested, 50);
    assert_eq!(metrics.chunks_throttled, 0);
    assert_eq!(metrics.frames_decoded, 0);

    session.destroy().await;
}

#[tokio::test]
async fn test_stalled_engine_throttles_then_rejects() {
    // Only the first input is ever answered.
    let worker = ScriptedWorker::new(|n| {
        if n == 1 {
            vec![video_frame(Bytes::from_static(b"yuv"))]
        } else {
            Vec::new()
        }
    });
    let config = ClientConfig {
        ingest_capacity: 1000,
        ..ClientConfig::default()
    };
    let (mut session, device) = open_live(config, worker.clone()).await;

    device.send_binary(framed_head()).await;
    device.send_binary(vec![1u8; 100]).await;
    eventually(|| session.metrics().frames_decoded == 1).await;

    // One batch goes to the idle engine, the rest queue: 312 bytes.
    for _ in 0..4 {
        device.send_binary(vec![1u8; 100]).await;
    }
    // Does not fit next to what is queued.
    device.send_binary(vec![3u8; 800]).await;
    // Queue grows to 832 bytes, then incoming data is replaced.
    for _ in 0..8 {
        device.send_binary(vec![1u8; 100]).await;
    }

    eventually(|| {
        let m = session.metrics();
        m.chunks_ingested + m.chunks_throttled + m.chunks_rejected == 14
    })
    .await;

    let metrics = session.metrics();
    assert_eq!(metrics.chunks_ingested, 10);
    assert_eq!(metrics.chunks_rejected, 1);
    assert_eq!(metrics.chunks_throttled, 3);
    assert!(metrics.buffer_fullness_percent >= 80.0);
    assert!(metrics.buffer_fullness_percent <= 100.0);
    eventually(|| worker.input_lengths() == vec![104, 104]).await;

    session.destroy().await;
}

#[tokio::test]
async fn test_underrun_redispatches_after_delay() {
    let worker = ScriptedWorker::new(|n| match n {
        2 => vec![underrun()],
        _ => vec![video_frame(Bytes::from_static(b"yuv"))],
    });
    let (mut session, device) = open_live(ClientConfig::default(), worker.clone()).await;

    device.send_binary(framed_head()).await;
    device.send_binary(vec![1u8; 100]).await;
    eventually(|| session.metrics().frames_decoded == 1).await;

    // The engine asks for more; the retry goes out with nothing queued.
    device.send_binary(vec![2u8; 100]).await;
    eventually(|| worker.input_lengths().len() == 3).await;
    assert_eq!(worker.input_lengths(), vec![104, 104, 0]);

    eventually(|| session.metrics().frames_decoded == 2).await;
    device.send_binary(vec![3u8; 100]).await;
    eventually(|| worker.input_lengths().len() == 4).await;
    assert_eq!(worker.input_lengths(), vec![104, 104, 0, 104]);

    session.destroy().await;
}
