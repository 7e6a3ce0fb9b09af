//! Stream socket: a duplex connection split into a sender and a receiver task.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::error::TransportError;
use crate::message::ControlCommand;
use crate::{TransportResult, INBOUND_CHANNEL_CAPACITY, OUTBOUND_CHANNEL_CAPACITY};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Something that happened on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame.
    Text(String),

    /// A binary frame.
    Binary(Bytes),

    /// The peer closed the socket or it failed.
    Closed { reason: String },
}

/// An open stream connection.
///
/// Dropping or closing it stops delivery of further events.
pub struct Connection {
    outbound: Option<mpsc::Sender<String>>,
    inbound: mpsc::Receiver<TransportEvent>,
    reader: Option<JoinHandle<()>>,
}

impl Connection {
    /// Build a connection over plain channels.
    ///
    /// The receiving side of `outbound` observes `None` once the connection
    /// is closed.
    pub fn from_channels(
        outbound: mpsc::Sender<String>,
        inbound: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        Self {
            outbound: Some(outbound),
            inbound,
            reader: None,
        }
    }

    /// Send a control command.
    pub async fn send(&self, command: &ControlCommand) -> TransportResult<()> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::NotConnected)?;
        let text = command.to_json()?;
        debug!(cmd = command.name(), "Sending control command");
        outbound
            .send(text)
            .await
            .map_err(|_| TransportError::Send("socket writer stopped".to_string()))
    }

    /// Next inbound event; `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }

    /// Whether `close` has not been called yet.
    pub fn is_open(&self) -> bool {
        self.outbound.is_some()
    }

    /// Close the connection. Safe to call more than once.
    pub fn close(&mut self) {
        if self.outbound.take().is_some() {
            debug!("Closing stream connection");
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.inbound.close();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens stream connections.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Connect to `url`.
    async fn connect(&self, url: &str) -> TransportResult<Connection>;
}

/// Connector for the device's WebSocket stream endpoint.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }

    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::Receiver<String>,
    ) {
        while let Some(text) = rx.recv().await {
            if let Err(e) = write.send(Message::Text(text)).await {
                error!("Failed to send WebSocket message: {}", e);
                return;
            }
        }

        if let Err(e) = write.send(Message::Close(None)).await {
            debug!("Close frame not delivered: {}", e);
        }
        debug!("Sender task terminated");
    }

    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        tx: mpsc::Sender<TransportEvent>,
    ) {
        let reason = loop {
            let event = match read.next().await {
                Some(Ok(Message::Text(text))) => TransportEvent::Text(text),
                Some(Ok(Message::Binary(data))) => TransportEvent::Binary(Bytes::from(data)),
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "closed by device".to_string());
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("WebSocket error: {}", e);
                    break e.to_string();
                }
                None => break "stream ended".to_string(),
            };

            if tx.send(event).await.is_err() {
                debug!("Receiver task terminated, consumer gone");
                return;
            }
        };

        info!("Stream socket closed: {}", reason);
        let _ = tx.send(TransportEvent::Closed { reason }).await;
    }
}

#[async_trait]
impl StreamConnector for WsConnector {
    #[instrument(name = "ws_connect", skip(self, url))]
    async fn connect(&self, url: &str) -> TransportResult<Connection> {
        let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        info!(
            host = parsed.host_str().unwrap_or_default(),
            "Connecting stream socket"
        );
        let (ws_stream, _) = connect_async(parsed.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (write, read) = ws_stream.split();
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);

        tokio::spawn(Self::sender_task(write, out_rx));
        let reader = tokio::spawn(Self::receiver_task(read, in_tx));

        let mut connection = Connection::from_channels(out_tx, in_rx);
        connection.reader = Some(reader);
        Ok(connection)
    }
}
