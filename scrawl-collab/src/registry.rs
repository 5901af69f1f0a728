//! Room registry: maps room identifiers to rooms.
//!
//! Rooms are created lazily on first join and live for the rest of the
//! process. The registry is an explicit object owned by the engine, so tests
//! can build isolated instances.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::room::Room;

pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    /// Per-connection queue capacity for rooms created by this registry
    broadcast_capacity: usize,
}

impl RoomRegistry {
    pub fn new(broadcast_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            broadcast_capacity,
        }
    }

    /// Get or create the room for `room_id`.
    ///
    /// Every caller asking for the same id receives the same `Arc<Room>`.
    pub async fn get_or_create(&self, room_id: &str) -> Arc<Room> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(room_id) {
                return room.clone();
            }
        }

        // Slow path: write lock, re-check before inserting
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(room_id) {
            return room.clone();
        }

        let room = Arc::new(Room::new(room_id, self.broadcast_capacity));
        rooms.insert(room_id.to_string(), room.clone());
        log::debug!("Created room {room_id}");
        room
    }

    pub async fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn room_ids(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }

    pub fn broadcast_capacity(&self) -> usize {
        self.broadcast_capacity
    }
}
