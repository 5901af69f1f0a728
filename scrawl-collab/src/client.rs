//! WebSocket client for the sync server.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - Typed senders for every client event
//! - Decoded server events delivered over an mpsc channel
//!
//! Feed the received events into a [`CanvasReplica`](crate::replica::CanvasReplica)
//! to keep a local copy of the room.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::operation::Operation;
use crate::protocol::{ClientEvent, ProtocolError, ServerEvent};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connection established
    Connected,
    /// Connection lost or closed
    Disconnected,
    /// A decoded server event
    Server(ServerEvent),
}

/// The sync client.
pub struct SyncClient {
    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Message>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<SyncEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<SyncEvent>,

    /// Server URL, e.g. `ws://127.0.0.1:3000`
    server_url: String,
}

impl SyncClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server.
    ///
    /// Spawns a writer task fed by an mpsc channel and a reader task that
    /// decodes server frames into [`SyncEvent::Server`].
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionFailed(e.to_string()));
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if ws_writer.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(SyncEvent::Connected).await;

        // Reader task: decode incoming frames
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                let decoded = match msg {
                    Ok(Message::Text(text)) => ServerEvent::decode(text.as_str()),
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                match decoded {
                    Ok(event) => {
                        if event_tx.send(SyncEvent::Server(event)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("Failed to decode server event: {e}"),
                }
            }

            // Connection lost
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(SyncEvent::Disconnected).await;
        });

        log::debug!("Connected to {}", self.server_url);
        Ok(())
    }

    /// Send any client event.
    pub async fn send(&self, event: &ClientEvent) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        let Some(tx) = &self.outgoing_tx else {
            return Err(ProtocolError::ConnectionClosed);
        };
        let text = event.encode()?;
        tx.send(Message::text(text))
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    pub async fn join(
        &self,
        room: Option<&str>,
        name: Option<&str>,
    ) -> Result<(), ProtocolError> {
        self.send(&ClientEvent::Join {
            room: room.map(str::to_string),
            name: name.map(str::to_string),
        })
        .await
    }

    /// Send the current state of a stroke. Call repeatedly with the same id
    /// while drawing.
    pub async fn send_stroke(&self, op: &Operation) -> Result<(), ProtocolError> {
        self.send(&ClientEvent::StrokeData(op.clone())).await
    }

    pub async fn send_cursor(&self, x: f64, y: f64) -> Result<(), ProtocolError> {
        self.send(&ClientEvent::Cursor { x, y }).await
    }

    pub async fn undo(&self, op_id: Option<&str>) -> Result<(), ProtocolError> {
        self.send(&ClientEvent::Undo {
            op_id: op_id.map(str::to_string),
        })
        .await
    }

    pub async fn redo(&self, op_id: Option<&str>) -> Result<(), ProtocolError> {
        self.send(&ClientEvent::Redo {
            op_id: op_id.map(str::to_string),
        })
        .await
    }

    pub async fn clear(&self) -> Result<(), ProtocolError> {
        self.send(&ClientEvent::Clear {}).await
    }

    pub async fn set_profile(
        &self,
        name: Option<&str>,
        color: Option<&str>,
    ) -> Result<(), ProtocolError> {
        self.send(&ClientEvent::Profile {
            name: name.map(str::to_string),
            color: color.map(str::to_string),
        })
        .await
    }

    /// Close the connection. The reader task reports `Disconnected` once the
    /// server acknowledges the close.
    pub async fn disconnect(&mut self) {
        if let Some(tx) = self.outgoing_tx.take() {
            let _ = tx.send(Message::Close(None)).await;
        }
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
