//! Per-connection session state.
//!
//! ```text
//! Unjoined ──join──► Joined ──disconnect──► Disconnected
//!                     │  ▲
//!                     └──┘ join (moves to another room)
//! ```
//!
//! A joined session holds its room and the receiving end of the room's
//! broadcast channel. `next_frame` yields the frames addressed to this
//! session; when the receiver lagged it yields a full resync instead of
//! the frames that were lost.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio_tungstenite::tungstenite::Utf8Bytes;
use uuid::Uuid;

use crate::broadcast::Frame;
use crate::operation::SessionId;
use crate::protocol::ServerEvent;
use crate::room::Room;

/// Colors handed out to sessions.
pub const PALETTE: [&str; 7] = [
    "#E11D48", "#0EA5A4", "#7C3AED", "#F59E0B", "#10B981", "#3B82F6", "#EF4444",
];

/// Stable palette color for a session id.
pub fn pick_color(id: SessionId) -> &'static str {
    PALETTE[(id.as_u128() % PALETTE.len() as u128) as usize]
}

/// Name used when a client joins without one.
pub fn default_name(id: SessionId) -> String {
    let simple = id.simple().to_string();
    format!("User-{}", &simple[..4])
}

/// Membership of a joined session.
pub struct Membership {
    room: Arc<Room>,
    rx: broadcast::Receiver<Arc<Frame>>,
    /// Set when the receiver lagged and the session has not been resynced yet
    needs_resync: bool,
}

impl Membership {
    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }
}

pub enum SessionState {
    Unjoined,
    Joined(Membership),
    Disconnected,
}

/// A connected client.
pub struct Session {
    id: SessionId,
    color: String,
    /// Name chosen through `profile`, reused when a join names none
    name: Option<String>,
    state: SessionState,
    /// Frames produced locally (resync) waiting to be delivered
    pending: VecDeque<Utf8Bytes>,
}

impl Session {
    /// A fresh, unjoined session with a random id and its palette color.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: SessionId) -> Self {
        Self {
            id,
            color: pick_color(id).to_string(),
            name: None,
            state: SessionState::Unjoined,
            pending: VecDeque::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Color used for this session's next join.
    pub fn color(&self) -> &str {
        &self.color
    }

    pub(crate) fn set_color(&mut self, color: String) {
        self.color = color;
    }

    /// Name set through a profile update, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_joined(&self) -> bool {
        matches!(self.state, SessionState::Joined(_))
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self.state, SessionState::Disconnected)
    }

    pub fn room(&self) -> Option<&Arc<Room>> {
        match &self.state {
            SessionState::Joined(membership) => Some(membership.room()),
            _ => None,
        }
    }

    pub(crate) fn attach(&mut self, room: Arc<Room>, rx: broadcast::Receiver<Arc<Frame>>) {
        self.pending.clear();
        self.state = SessionState::Joined(Membership {
            room,
            rx,
            needs_resync: false,
        });
    }

    /// Leave the current room, returning to `Unjoined`.
    pub(crate) fn detach(&mut self) -> Option<Arc<Room>> {
        match std::mem::replace(&mut self.state, SessionState::Unjoined) {
            SessionState::Joined(membership) => {
                self.pending.clear();
                Some(membership.room)
            }
            other => {
                self.state = other;
                None
            }
        }
    }

    pub(crate) fn close(&mut self) {
        self.pending.clear();
        self.state = SessionState::Disconnected;
    }

    /// Wait for the next frame addressed to this session.
    ///
    /// Pends forever while unjoined and returns `None` once disconnected or
    /// when the room's channel closed. Cancel-safe.
    pub async fn next_frame(&mut self) -> Option<Utf8Bytes> {
        loop {
            if let Some(text) = self.pending.pop_front() {
                return Some(text);
            }

            let membership = match &mut self.state {
                SessionState::Joined(membership) => membership,
                SessionState::Unjoined => return std::future::pending().await,
                SessionState::Disconnected => return None,
            };

            if membership.needs_resync {
                self.pending.extend(resync(self.id, membership).await);
                continue;
            }

            match membership.rx.recv().await {
                Ok(frame) => {
                    if frame.is_for(self.id) {
                        return Some(frame.text().clone());
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    log::warn!(
                        "Session {} lagged by {missed} frames in room {}",
                        self.id,
                        membership.room.id()
                    );
                    membership.room.broadcast().record_dropped(missed);
                    membership.needs_resync = true;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Discard the stale queue and build a full snapshot for one session.
///
/// Runs under the room lock: every frame still queued was sent before the
/// snapshot, and every frame sent afterwards reflects a later state.
async fn resync(id: SessionId, membership: &mut Membership) -> Vec<Utf8Bytes> {
    let room_log = membership.room.lock().await;
    loop {
        match membership.rx.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    membership.needs_resync = false;

    let events = [
        ServerEvent::HistoryRebuild {
            operations: room_log.snapshot(),
        },
        ServerEvent::UsersUpdate {
            sessions: room_log.sessions().clone(),
        },
    ];
    drop(room_log);

    log::debug!("Resynced session {id} in room {}", membership.room.id());
    events
        .iter()
        .filter_map(|event| match event.encode() {
            Ok(text) => Some(Utf8Bytes::from(text)),
            Err(e) => {
                log::error!("Failed to encode {} for session {id}: {e}", event.name());
                None
            }
        })
        .collect()
}
