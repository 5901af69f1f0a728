//! WebSocket server that binds connections to the sync engine.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── SyncServer ── SyncEngine ── RoomRegistry
//! Client B ──┘                                   │
//!                                      ┌─────────┴─────────┐
//!                                      ▼                   ▼
//!                               Room "main"           Room "team"
//!                          (RoomLog + BroadcastGroup)
//! ```
//!
//! Each connection runs one task that multiplexes two sources with
//! `tokio::select!`: inbound WebSocket frames, decoded and handed to the
//! engine, and outbound frames from the session's room queue.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::engine::{SyncEngine, DEFAULT_ROOM};
use crate::protocol::{ClientEvent, ProtocolError};
use crate::registry::RoomRegistry;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames buffered per connection before the oldest are dropped
    pub broadcast_capacity: usize,
    /// Room joined when a client names none
    pub default_room: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            broadcast_capacity: 256,
            default_room: DEFAULT_ROOM.to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by environment variables.
    ///
    /// | Variable                    | Effect                          |
    /// |-----------------------------|---------------------------------|
    /// | `SCRAWL_BIND_ADDR`          | full bind address               |
    /// | `PORT`                      | binds `0.0.0.0:$PORT`           |
    /// | `SCRAWL_BROADCAST_CAPACITY` | per-connection queue capacity   |
    /// | `SCRAWL_DEFAULT_ROOM`       | room used when a join names none |
    ///
    /// `SCRAWL_BIND_ADDR` wins over `PORT`. Unparsable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("SCRAWL_BIND_ADDR").filter(|v| !v.trim().is_empty()) {
            config.bind_addr = addr.trim().to_string();
        } else if let Some(port) = lookup("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => config.bind_addr = format!("0.0.0.0:{port}"),
                Err(e) => log::warn!("Ignoring PORT={port:?}: {e}"),
            }
        }

        if let Some(capacity) = lookup("SCRAWL_BROADCAST_CAPACITY") {
            match capacity.trim().parse::<usize>() {
                Ok(capacity) => config.broadcast_capacity = capacity,
                Err(e) => log::warn!("Ignoring SCRAWL_BROADCAST_CAPACITY={capacity:?}: {e}"),
            }
        }

        if let Some(room) = lookup("SCRAWL_DEFAULT_ROOM").filter(|v| !v.trim().is_empty()) {
            config.default_room = room.trim().to_string();
        }

        config
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
}

/// Errors that end the accept loop or a single connection.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    engine: Arc<SyncEngine>,
    /// Server-wide statistics
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a new sync server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(RoomRegistry::new(config.broadcast_capacity));
        let engine = Arc::new(SyncEngine::new(registry, config.default_room.clone()));
        Self {
            config,
            engine,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let engine = self.engine.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, engine, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        engine: Arc<SyncEngine>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), ServerError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let mut session = engine.connect();
        log::info!("WebSocket connection established from {addr} as {}", session.id());

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result: Result<(), ServerError> = async {
            loop {
                tokio::select! {
                    // Incoming WebSocket message
                    msg = ws_receiver.next() => {
                        let decoded = match msg {
                            Some(Ok(Message::Text(text))) => {
                                record_inbound(&stats, text.len()).await;
                                ClientEvent::decode(text.as_str())
                            }
                            Some(Ok(Message::Binary(data))) => {
                                record_inbound(&stats, data.len()).await;
                                ClientEvent::decode_slice(&data)
                            }
                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                                continue;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }
                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }
                            Some(Ok(_)) => continue,
                        };

                        let event = match decoded {
                            Ok(event) => event,
                            Err(e) => {
                                log::warn!("Failed to decode message from {addr}: {e}");
                                continue;
                            }
                        };

                        let joining = matches!(event, ClientEvent::Join { .. });
                        let reply = engine.handle(&mut session, event).await;
                        if joining {
                            let rooms = engine.registry().room_count().await;
                            stats.write().await.active_rooms = rooms;
                        }
                        if let Some(reply) = reply {
                            ws_sender.send(Message::text(reply.encode()?)).await?;
                        }
                    }

                    // Outgoing room frame
                    frame = session.next_frame() => {
                        match frame {
                            Some(text) => ws_sender.send(Message::Text(text)).await?,
                            None => break,
                        }
                    }
                }
            }
            Ok(())
        }
        .await;

        engine.disconnect(&mut session).await;
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }
        log::debug!("Session {} from {addr} finished", session.id());

        result
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }
}

async fn record_inbound(stats: &RwLock<ServerStats>, bytes: usize) {
    let mut s = stats.write().await;
    s.total_messages += 1;
    s.total_bytes += bytes as u64;
}
