//! Identifier types and their allocators.
//!
//! Every id source is an `IdGenerator` owned by whoever creates the entities.
//! The server owns one `IdAllocator` and hands `Arc` clones to its rooms and
//! clients, so ids stay unique for the lifetime of that server.

use std::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};

use serde::{Deserialize, Serialize};

/// Identifies a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u32);

/// Identifies a bullet. Independent from client ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BulletId(pub u32);

/// Identifies a room in the server registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BulletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic counter. The first id handed out is 1.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU32,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }
}

impl IdGenerator {
    pub fn next_raw(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// The id sources of one server instance.
#[derive(Debug, Default)]
pub struct IdAllocator {
    clients: IdGenerator,
    bullets: IdGenerator,
    rooms: IdGenerator,
}

impl IdAllocator {
    pub fn client(&self) -> ClientId {
        ClientId(self.clients.next_raw())
    }

    pub fn bullet(&self) -> BulletId {
        BulletId(self.bullets.next_raw())
    }

    pub fn room(&self) -> RoomId {
        RoomId(self.rooms.next_raw())
    }
}
