//! Stroke and erase operations: the unit of a room's history.
//!
//! An operation is created by the authoring client with an opaque id and
//! grows point by point while the stroke is in progress. Every update for
//! the same id replaces the earlier record in the room log; the server owns
//! the `author`, `timestamp` and `undone` fields.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a connected client.
pub type SessionId = Uuid;

/// Client-assigned operation token.
pub type OperationId = String;

/// Drawing tool that produced an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Brush,
    Eraser,
}

/// 2D position in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

fn default_width() -> f64 {
    4.0
}

/// One stroke or erase action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    /// Session that first inserted this id. Stamped by the server.
    #[serde(default)]
    pub author: SessionId,
    pub tool: Tool,
    #[serde(default)]
    pub points: Vec<Point>,
    /// CSS color string. Ignored for the eraser.
    #[serde(default)]
    pub color: String,
    #[serde(default = "default_width")]
    pub width: f64,
    #[serde(default)]
    pub undone: bool,
    /// Server ingestion time in milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: u64,
}

impl Operation {
    /// Create a brush stroke.
    pub fn brush(
        id: impl Into<OperationId>,
        points: Vec<Point>,
        color: impl Into<String>,
        width: f64,
    ) -> Self {
        Self {
            id: id.into(),
            author: Uuid::nil(),
            tool: Tool::Brush,
            points,
            color: color.into(),
            width,
            undone: false,
            timestamp: 0,
        }
    }

    /// Create an eraser stroke.
    pub fn eraser(id: impl Into<OperationId>, points: Vec<Point>, width: f64) -> Self {
        Self {
            id: id.into(),
            author: Uuid::nil(),
            tool: Tool::Eraser,
            points,
            color: String::new(),
            width,
            undone: false,
            timestamp: 0,
        }
    }

    /// Whether the operation should be rendered.
    pub fn is_active(&self) -> bool {
        !self.undone
    }
}

/// Current wall-clock time in milliseconds, used to stamp new operations.
pub(crate) fn ingestion_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
