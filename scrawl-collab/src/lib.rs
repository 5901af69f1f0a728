//! # scrawl-collab: Room synchronization for a shared drawing canvas
//!
//! Keeps one authoritative, ordered history of strokes per room and fans
//! changes out to every connection in that room over WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     WebSocket      ┌─────────────┐
//! │ SyncClient    │ ◄────────────────► │ SyncServer  │
//! │ CanvasReplica │     JSON events    │ SyncEngine  │
//! └───────────────┘                    └──────┬──────┘
//!                                             │
//!                                     ┌───────┴───────┐
//!                                     │ RoomRegistry  │
//!                                     └───────┬───────┘
//!                                             ▼
//!                                   ┌───────────────────┐
//!                                   │ Room              │
//!                                   │  RoomLog (Mutex)  │
//!                                   │  BroadcastGroup   │
//!                                   └───────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`operation`]: Strokes and erases, the unit of history
//! - [`room`]: Room log: ordered history, undo/redo, membership
//! - [`registry`]: Lazy room creation by id
//! - [`broadcast`]: Per-room fan-out with drop-oldest queues
//! - [`protocol`]: JSON events exchanged with clients
//! - [`session`]: Per-connection state and outbound frames
//! - [`engine`]: Applies client events and decides who hears about them
//! - [`server`]: WebSocket server
//! - [`client`]: WebSocket client
//! - [`replica`]: Client-side copy of a room

pub mod operation;
pub mod room;
pub mod registry;
pub mod broadcast;
pub mod protocol;
pub mod session;
pub mod engine;
pub mod server;
pub mod client;
pub mod replica;

// Re-exports for convenience
pub use operation::{Operation, OperationId, Point, SessionId, Tool};
pub use room::{ActionError, Room, RoomLog, SessionInfo, SessionMap};
pub use registry::RoomRegistry;
pub use broadcast::{Audience, BroadcastGroup, BroadcastStats, Frame};
pub use protocol::{ClientEvent, ProtocolError, ServerEvent, You};
pub use session::{default_name, pick_color, Session, SessionState, PALETTE};
pub use engine::{SyncEngine, DEFAULT_ROOM};
pub use server::{ServerConfig, ServerError, ServerStats, SyncServer};
pub use client::{ConnectionState, SyncClient, SyncEvent};
pub use replica::CanvasReplica;
