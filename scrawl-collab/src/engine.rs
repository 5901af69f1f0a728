//! Synchronization engine: applies client events to rooms and decides who
//! hears about them.
//!
//! ```text
//!                      ┌──────────── reply (init, action:error) ──► sender
//! ClientEvent ──► SyncEngine ──► Room::lock() ──► RoomLog mutation
//!                                     │
//!                                     └──► BroadcastGroup::send()
//!                                            ├─ stroke:remote / cursor  → all but sender
//!                                            └─ history:rebuild / users:update → everyone
//! ```
//!
//! Every broadcast that depends on log state is issued while the room lock
//! is held, so subscribers observe frames in log order. The engine knows
//! nothing about sockets; `server` drives it from WebSocket connections and
//! tests drive it directly.

use std::sync::Arc;

use crate::broadcast::Audience;
use crate::operation::{Operation, SessionId};
use crate::protocol::{ClientEvent, ServerEvent, You};
use crate::registry::RoomRegistry;
use crate::room::{ActionError, Room, RoomLog, SessionInfo};
use crate::session::{default_name, Session};

/// Room used when a join names none.
pub const DEFAULT_ROOM: &str = "main";

pub struct SyncEngine {
    registry: Arc<RoomRegistry>,
    default_room: String,
}

impl SyncEngine {
    pub fn new(registry: Arc<RoomRegistry>, default_room: impl Into<String>) -> Self {
        Self {
            registry,
            default_room: default_room.into(),
        }
    }

    /// Engine with its own registry and the default room name.
    pub fn with_capacity(broadcast_capacity: usize) -> Self {
        Self::new(Arc::new(RoomRegistry::new(broadcast_capacity)), DEFAULT_ROOM)
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn default_room(&self) -> &str {
        &self.default_room
    }

    /// Start a new, unjoined session for a connection.
    pub fn connect(&self) -> Session {
        Session::new()
    }

    /// Apply one client event.
    ///
    /// Returns the event to deliver to the sender only (`init` after a join,
    /// `action:error` after a failed undo/redo). Events from unjoined or
    /// disconnected sessions other than `join` are ignored.
    pub async fn handle(&self, session: &mut Session, event: ClientEvent) -> Option<ServerEvent> {
        if session.is_disconnected() {
            log::warn!("Ignoring {} from disconnected session {}", event.name(), session.id());
            return None;
        }

        if let ClientEvent::Join { room, name } = event {
            return Some(self.join(session, room, name).await);
        }

        let Some(room) = session.room().cloned() else {
            log::debug!("Ignoring {} from unjoined session {}", event.name(), session.id());
            return None;
        };
        let from = session.id();

        match event {
            ClientEvent::Join { .. } => None,
            ClientEvent::StrokeData(op) => {
                self.upsert(&room, from, op).await;
                None
            }
            ClientEvent::Cursor { x, y } => {
                log::trace!("Cursor from {from} in room {}", room.id());
                publish(&room, Audience::AllExcept(from), &ServerEvent::Cursor {
                    session_id: from,
                    x,
                    y,
                });
                None
            }
            ClientEvent::Undo { op_id } => self
                .undo(&room, from, op_id.as_deref())
                .await
                .err()
                .map(ServerEvent::action_error),
            ClientEvent::Redo { op_id } => self
                .redo(&room, from, op_id.as_deref())
                .await
                .err()
                .map(ServerEvent::action_error),
            ClientEvent::Clear {} => {
                self.clear(&room, from).await;
                None
            }
            ClientEvent::Profile { name, color } => {
                let name = non_empty(name);
                let color = non_empty(color);
                if let Some(name) = &name {
                    session.set_name(name.clone());
                }
                if let Some(color) = &color {
                    session.set_color(color.clone());
                }
                self.update_profile(&room, from, name, color).await;
                None
            }
        }
    }

    /// Attach `session` to a room and build its `init` snapshot.
    ///
    /// A session already in a room leaves it first. Without a name the
    /// session keeps the last one it chose, or gets a generated one.
    pub async fn join(
        &self,
        session: &mut Session,
        room: Option<String>,
        name: Option<String>,
    ) -> ServerEvent {
        self.leave(session).await;

        let room_id = non_empty(room).unwrap_or_else(|| self.default_room.clone());
        let room = self.registry.get_or_create(&room_id).await;
        if let Some(name) = non_empty(name) {
            session.set_name(name);
        }
        let you = You {
            id: session.id(),
            name: session
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| default_name(session.id())),
            color: session.color().to_string(),
        };

        let mut room_log = room.lock().await;
        // Subscribe before the snapshot so no later frame is missed.
        let rx = room.broadcast().subscribe();
        room_log.add_session(
            you.id,
            SessionInfo {
                name: you.name.clone(),
                color: you.color.clone(),
            },
        );
        let init = ServerEvent::Init {
            operations: room_log.snapshot(),
            sessions: room_log.sessions().clone(),
            you,
        };
        publish_users(&room, &room_log);
        drop(room_log);

        log::info!("Session {} joined room {}", session.id(), room.id());
        session.attach(room, rx);
        init
    }

    /// Close a session for good, leaving its room.
    pub async fn disconnect(&self, session: &mut Session) {
        self.leave(session).await;
        session.close();
    }

    async fn leave(&self, session: &mut Session) {
        let Some(room) = session.detach() else {
            return;
        };
        let mut room_log = room.lock().await;
        room_log.remove_session(&session.id());
        publish_users(&room, &room_log);
        drop(room_log);
        log::info!("Session {} left room {}", session.id(), room.id());
    }

    async fn upsert(&self, room: &Room, from: SessionId, op: Operation) {
        let mut room_log = room.lock().await;
        let op = room_log.upsert(op, from).clone();
        log::debug!(
            "Stroke {} ({} points) from {from} in room {}",
            op.id,
            op.points.len(),
            room.id()
        );
        publish(room, Audience::AllExcept(from), &ServerEvent::StrokeRemote(op));
    }

    async fn undo(&self, room: &Room, from: SessionId, op_id: Option<&str>) -> Result<(), ActionError> {
        let mut room_log = room.lock().await;
        let result = room_log.undo(op_id).map(|op| op.id.clone());
        self.finish_structural(room, &room_log, from, "undo", result)
    }

    async fn redo(&self, room: &Room, from: SessionId, op_id: Option<&str>) -> Result<(), ActionError> {
        let mut room_log = room.lock().await;
        let result = room_log.redo(op_id).map(|op| op.id.clone());
        self.finish_structural(room, &room_log, from, "redo", result)
    }

    fn finish_structural(
        &self,
        room: &Room,
        room_log: &RoomLog,
        from: SessionId,
        action: &str,
        result: Result<String, ActionError>,
    ) -> Result<(), ActionError> {
        match result {
            Ok(op_id) => {
                log::debug!("Session {from} applied {action} to {op_id} in room {}", room.id());
                publish_history(room, room_log);
                Ok(())
            }
            Err(e) => {
                log::debug!("Session {from} {action} failed in room {}: {e}", room.id());
                Err(e)
            }
        }
    }

    async fn clear(&self, room: &Room, from: SessionId) {
        let mut room_log = room.lock().await;
        room_log.clear();
        log::info!("Session {from} cleared room {}", room.id());
        publish_history(room, &room_log);
    }

    async fn update_profile(
        &self,
        room: &Room,
        from: SessionId,
        name: Option<String>,
        color: Option<String>,
    ) {
        if name.is_none() && color.is_none() {
            return;
        }
        let mut room_log = room.lock().await;
        if room_log.update_session(&from, name, color) {
            publish_users(room, &room_log);
        }
    }
}

fn publish(room: &Room, audience: Audience, event: &ServerEvent) {
    if let Err(e) = room.broadcast().send(audience, event) {
        log::error!("Failed to broadcast {} in room {}: {e}", event.name(), room.id());
    }
}

fn publish_history(room: &Room, room_log: &RoomLog) {
    publish(room, Audience::Everyone, &ServerEvent::HistoryRebuild {
        operations: room_log.snapshot(),
    });
}

fn publish_users(room: &Room, room_log: &RoomLog) {
    publish(room, Audience::Everyone, &ServerEvent::UsersUpdate {
        sessions: room_log.sessions().clone(),
    });
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
