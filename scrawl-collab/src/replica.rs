//! Client-side copy of a room.
//!
//! Applies server events in arrival order:
//!
//! | Event             | Effect                                        |
//! |-------------------|-----------------------------------------------|
//! | `init`            | replace operations, sessions; remember `you`  |
//! | `stroke:remote`   | replace the operation with that id or append  |
//! | `history:rebuild` | replace all operations                        |
//! | `users:update`    | replace sessions, forget cursors of leavers   |
//! | `cursor`          | move one remote cursor                        |
//! | `action:error`    | nothing                                       |

use std::collections::HashMap;

use crate::operation::{Operation, Point, SessionId};
use crate::protocol::{ServerEvent, You};
use crate::room::SessionMap;

#[derive(Debug, Default)]
pub struct CanvasReplica {
    operations: Vec<Operation>,
    sessions: SessionMap,
    cursors: HashMap<SessionId, Point>,
    me: Option<You>,
}

impl CanvasReplica {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one server event. Returns true when the drawable history changed.
    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::Init { operations, sessions, you } => {
                self.operations = operations.clone();
                self.sessions = sessions.clone();
                self.cursors.clear();
                self.me = Some(you.clone());
                true
            }
            ServerEvent::StrokeRemote(op) => {
                self.merge(op.clone());
                true
            }
            ServerEvent::HistoryRebuild { operations } => {
                self.operations = operations.clone();
                true
            }
            ServerEvent::UsersUpdate { sessions } => {
                self.sessions = sessions.clone();
                self.cursors.retain(|id, _| sessions.contains_key(id));
                false
            }
            ServerEvent::Cursor { session_id, x, y } => {
                self.cursors.insert(*session_id, Point::new(*x, *y));
                false
            }
            ServerEvent::ActionError { .. } => false,
        }
    }

    /// Record a stroke drawn locally before the server echoes anything.
    pub fn record_local(&mut self, mut op: Operation) {
        if let Some(me) = &self.me {
            op.author = me.id;
        }
        self.merge(op);
    }

    fn merge(&mut self, op: Operation) {
        match self.operations.iter_mut().find(|existing| existing.id == op.id) {
            Some(existing) => *existing = op,
            None => self.operations.push(op),
        }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Operations to draw, in history order.
    pub fn visible(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(|op| op.is_active())
    }

    /// The most recent active operation by `author`.
    pub fn last_active_by(&self, author: SessionId) -> Option<&Operation> {
        self.operations
            .iter()
            .rev()
            .find(|op| op.author == author && op.is_active())
    }

    /// Id to send with an undo request: this client's own latest stroke.
    pub fn undo_target(&self) -> Option<&str> {
        let me = self.me.as_ref()?;
        self.last_active_by(me.id).map(|op| op.id.as_str())
    }

    pub fn sessions(&self) -> &SessionMap {
        &self.sessions
    }

    pub fn cursors(&self) -> &HashMap<SessionId, Point> {
        &self.cursors
    }

    pub fn me(&self) -> Option<&You> {
        self.me.as_ref()
    }
}
