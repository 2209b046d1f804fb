//! WebSocket client transport using `tokio-tungstenite`.
//!
//! Each call to [`WebSocketTransport::connect`] opens one WebSocket and
//! splits it into two background tasks:
//!
//! ```text
//!            send() ──► mpsc ──► writer task ──► WebSocket sink
//! poll_received() ◄── mpsc ◄── reader task ◄── WebSocket stream
//! ```
//!
//! The session thread only ever touches the channel ends, so `send` and
//! `poll_received` never await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::{ConnectionId, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// What the reader tasks report back to the transport.
enum Inbound {
    Frame(ConnectionId, Vec<u8>),
    Closed(ConnectionId),
}

/// A [`Transport`] that speaks binary WebSocket frames to one or more
/// servers.
///
/// Must be created and connected inside a Tokio runtime, because
/// `connect` spawns the reader/writer tasks.
pub struct WebSocketTransport {
    /// Outbound queue per open connection. Dropping a sender tells the
    /// writer task to close its socket.
    writers: HashMap<ConnectionId, mpsc::UnboundedSender<Vec<u8>>>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketTransport {
    /// Creates a transport with no open connections.
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            writers: HashMap::new(),
            inbound_tx,
            inbound_rx,
        }
    }

    /// Opens a WebSocket to `url` (for example `ws://127.0.0.1:14617`).
    ///
    /// # Errors
    /// [`TransportError::ConnectFailed`] if the TCP connect or the WebSocket
    /// handshake fails.
    pub async fn connect(&mut self, url: &str) -> Result<ConnectionId, TransportError> {
        let (ws, _) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            TransportError::ConnectFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))
        })?;

        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        let (mut sink, mut stream) = ws.split();
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        tokio::spawn(async move {
            while let Some(data) = writer_rx.recv().await {
                if let Err(e) = sink.send(Message::Binary(data.into())).await {
                    tracing::debug!(%id, error = %e, "WebSocket write failed");
                    return;
                }
            }
            let _ = sink.close().await;
        });

        let inbound_tx = self.inbound_tx.clone();
        tokio::spawn(async move {
            loop {
                let frame = match stream.next().await {
                    Some(Ok(Message::Binary(data))) => data.into(),
                    Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // ping/pong/raw frame
                    Some(Err(e)) => {
                        tracing::debug!(%id, error = %e, "WebSocket read failed");
                        break;
                    }
                };
                if inbound_tx.send(Inbound::Frame(id, frame)).is_err() {
                    // Transport dropped; nobody is listening.
                    return;
                }
            }
            let _ = inbound_tx.send(Inbound::Closed(id));
        });

        self.writers.insert(id, writer_tx);
        tracing::info!(%id, url, "WebSocket connected");
        Ok(id)
    }

    /// Closes a connection. Returns `false` if it wasn't open.
    pub fn disconnect(&mut self, connection: ConnectionId) -> bool {
        let was_open = self.writers.remove(&connection).is_some();
        if was_open {
            tracing::debug!(%connection, "WebSocket disconnect requested");
        }
        was_open
    }

    /// Returns `true` while `connection` is open.
    pub fn is_connected(&self, connection: ConnectionId) -> bool {
        self.writers.contains_key(&connection)
    }
}

impl Transport for WebSocketTransport {
    fn send(&mut self, connection: ConnectionId, data: &[u8]) -> Result<(), TransportError> {
        let writer = self
            .writers
            .get(&connection)
            .ok_or(TransportError::UnknownConnection(connection))?;

        if writer.send(data.to_vec()).is_err() {
            self.writers.remove(&connection);
            return Err(TransportError::ConnectionClosed(connection));
        }
        Ok(())
    }

    fn poll_received(&mut self) -> Vec<(ConnectionId, Vec<u8>)> {
        let mut frames = Vec::new();
        while let Ok(inbound) = self.inbound_rx.try_recv() {
            match inbound {
                Inbound::Frame(id, data) => frames.push((id, data)),
                Inbound::Closed(id) => {
                    if self.writers.remove(&id).is_some() {
                        tracing::info!(%id, "WebSocket closed by peer");
                    }
                }
            }
        }
        frames
    }
}
