//! Authoritative per-room history and membership.
//!
//! ```text
//! stroke:data ──► upsert ──┐
//! undo / redo ──► flag  ───┼──► RoomLog { operations, sessions }
//! clear       ──► reset ───┘          │
//!                                     ▼
//!                              BroadcastGroup (fan-out)
//! ```
//!
//! `operations` is ordered by arrival at the server; that order is the only
//! source of truth for replay. All mutation goes through the room's mutex,
//! so the order of broadcasts issued under the lock matches the log order.
//!
//! Reference: Kleppmann, Designing Data-Intensive Applications, Chapter 9 (total order broadcast)

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::broadcast::BroadcastGroup;
use crate::operation::{ingestion_time, Operation, OperationId, SessionId};

/// Display attributes of a connected session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub name: String,
    pub color: String,
}

/// Session id → display attributes, ordered by id for stable output.
pub type SessionMap = BTreeMap<SessionId, SessionInfo>;

/// Undo/redo failures. Reported only to the requesting connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum ActionError {
    #[error("Nothing to undo")]
    NothingToUndo,
    #[error("Nothing to redo")]
    NothingToRedo,
}

/// Ordered operation log plus the sessions currently attached to the room.
#[derive(Debug, Default)]
pub struct RoomLog {
    operations: Vec<Operation>,
    /// Operation id → position in `operations`
    positions: HashMap<OperationId, usize>,
    sessions: SessionMap,
}

impl RoomLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new operation or replace the existing one with the same id.
    ///
    /// A new id is appended, stamped with `author`, the ingestion time and
    /// `undone = false`. A known id keeps its position, author, timestamp,
    /// undo state, tool and style; only the points are replaced.
    pub fn upsert(&mut self, mut op: Operation, author: SessionId) -> &Operation {
        match self.positions.get(&op.id).copied() {
            Some(pos) => {
                let existing = &mut self.operations[pos];
                existing.points = std::mem::take(&mut op.points);
                &self.operations[pos]
            }
            None => {
                op.author = author;
                op.timestamp = ingestion_time();
                op.undone = false;
                let pos = self.operations.len();
                self.positions.insert(op.id.clone(), pos);
                self.operations.push(op);
                &self.operations[pos]
            }
        }
    }

    /// Flag an operation as undone.
    ///
    /// Resolves `op_id` exactly when it names an operation in the log.
    /// Otherwise falls back to the most recently inserted operation that is
    /// still active, whoever authored it.
    pub fn undo(&mut self, op_id: Option<&str>) -> Result<&Operation, ActionError> {
        let pos = op_id
            .and_then(|id| self.positions.get(id).copied())
            .or_else(|| self.operations.iter().rposition(Operation::is_active))
            .ok_or(ActionError::NothingToUndo)?;
        self.operations[pos].undone = true;
        Ok(&self.operations[pos])
    }

    /// Clear the undone flag of an operation.
    ///
    /// A given `op_id` must name an operation in the log; a miss fails.
    /// Without an id, takes the *earliest* undone operation.
    pub fn redo(&mut self, op_id: Option<&str>) -> Result<&Operation, ActionError> {
        let pos = match op_id {
            Some(id) => self.positions.get(id).copied(),
            None => self.operations.iter().position(|op| op.undone),
        }
        .ok_or(ActionError::NothingToRedo)?;
        self.operations[pos].undone = false;
        Ok(&self.operations[pos])
    }

    /// Drop every operation. Sessions are untouched.
    pub fn clear(&mut self) {
        self.operations = Vec::new();
        self.positions.clear();
    }

    /// Copy of the full ordered history, undone operations included.
    pub fn snapshot(&self) -> Vec<Operation> {
        self.operations.clone()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn get(&self, op_id: &str) -> Option<&Operation> {
        self.positions.get(op_id).map(|&pos| &self.operations[pos])
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Attach a session. Re-adding an id overwrites its attributes.
    pub fn add_session(&mut self, id: SessionId, info: SessionInfo) {
        self.sessions.insert(id, info);
    }

    pub fn remove_session(&mut self, id: &SessionId) -> Option<SessionInfo> {
        self.sessions.remove(id)
    }

    /// Change a session's own display attributes. Returns false for an unknown session.
    pub fn update_session(
        &mut self,
        id: &SessionId,
        name: Option<String>,
        color: Option<String>,
    ) -> bool {
        let Some(info) = self.sessions.get_mut(id) else {
            return false;
        };
        if let Some(name) = name {
            info.name = name;
        }
        if let Some(color) = color {
            info.color = color;
        }
        true
    }

    pub fn sessions(&self) -> &SessionMap {
        &self.sessions
    }

    pub fn session(&self, id: &SessionId) -> Option<&SessionInfo> {
        self.sessions.get(id)
    }
}

/// A room: its serialized log and the broadcast group of its connections.
pub struct Room {
    id: String,
    log: Mutex<RoomLog>,
    broadcast: BroadcastGroup,
}

impl Room {
    pub fn new(id: impl Into<String>, broadcast_capacity: usize) -> Self {
        Self {
            id: id.into(),
            log: Mutex::new(RoomLog::new()),
            broadcast: BroadcastGroup::new(broadcast_capacity),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Acquire exclusive access to the log.
    ///
    /// Broadcasts that must follow log order are sent while the guard is held.
    pub async fn lock(&self) -> MutexGuard<'_, RoomLog> {
        self.log.lock().await
    }

    pub fn broadcast(&self) -> &BroadcastGroup {
        &self.broadcast
    }
}
