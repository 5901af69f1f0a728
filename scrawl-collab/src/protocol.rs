//! JSON event protocol spoken over the WebSocket.
//!
//! Every frame is a text message of the form:
//! ```text
//! { "event": "<name>", "data": <payload> }
//! ```
//!
//! | Direction | Event           | Payload                       |
//! |-----------|-----------------|-------------------------------|
//! | C→S       | join            | {room?, name?}                |
//! | C→S       | stroke:data     | Operation                     |
//! | C→S       | cursor          | {x, y}                        |
//! | C→S       | undo / redo     | {opId?}                       |
//! | C→S       | clear           | {}                            |
//! | C→S       | profile         | {name?, color?}               |
//! | S→C       | init            | {operations, sessions, you}   |
//! | S→C       | stroke:remote   | Operation                     |
//! | S→C       | cursor          | {sessionId, x, y}             |
//! | S→C       | history:rebuild | {operations}                  |
//! | S→C       | users:update    | {sessions}                    |
//! | S→C       | action:error    | {kind, message}               |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::operation::{Operation, SessionId};
use crate::room::{ActionError, SessionMap};

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Attach to a room. Missing values fall back to server defaults.
    #[serde(rename = "join")]
    Join {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Incremental or final state of a stroke.
    #[serde(rename = "stroke:data")]
    StrokeData(Operation),
    #[serde(rename = "cursor")]
    Cursor { x: f64, y: f64 },
    #[serde(rename = "undo")]
    Undo {
        #[serde(rename = "opId", default, skip_serializing_if = "Option::is_none")]
        op_id: Option<String>,
    },
    #[serde(rename = "redo")]
    Redo {
        #[serde(rename = "opId", default, skip_serializing_if = "Option::is_none")]
        op_id: Option<String>,
    },
    #[serde(rename = "clear")]
    Clear {},
    /// Change the sender's own display attributes.
    #[serde(rename = "profile")]
    Profile {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },
}

impl ClientEvent {
    /// Wire name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::StrokeData(_) => "stroke:data",
            Self::Cursor { .. } => "cursor",
            Self::Undo { .. } => "undo",
            Self::Redo { .. } => "redo",
            Self::Clear {} => "clear",
            Self::Profile { .. } => "profile",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    /// Decode a binary frame carrying the same UTF-8 JSON.
    pub fn decode_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// The joining connection's own identity, sent in `init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct You {
    pub id: SessionId,
    pub name: String,
    pub color: String,
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Full snapshot, sent once to a connection when it joins.
    #[serde(rename = "init")]
    Init {
        operations: Vec<Operation>,
        sessions: SessionMap,
        you: You,
    },
    /// One upserted operation, sent to everyone but its sender.
    #[serde(rename = "stroke:remote")]
    StrokeRemote(Operation),
    #[serde(rename = "cursor")]
    Cursor {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        x: f64,
        y: f64,
    },
    /// Full history after undo, redo or clear.
    #[serde(rename = "history:rebuild")]
    HistoryRebuild { operations: Vec<Operation> },
    #[serde(rename = "users:update")]
    UsersUpdate { sessions: SessionMap },
    #[serde(rename = "action:error")]
    ActionError { kind: ActionError, message: String },
}

impl ServerEvent {
    pub fn action_error(kind: ActionError) -> Self {
        Self::ActionError {
            kind,
            message: kind.to_string(),
        }
    }

    /// Wire name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::StrokeRemote(_) => "stroke:remote",
            Self::Cursor { .. } => "cursor",
            Self::HistoryRebuild { .. } => "history:rebuild",
            Self::UsersUpdate { .. } => "users:update",
            Self::ActionError { .. } => "action:error",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Connection closed")]
    ConnectionClosed,
}
