//! `arena_server`
//!
//! Server-side systems:
//! - Accept loop and room assignment (first room with a free slot, else a new one)
//! - One task per room: fixed-tick bullet simulation, hits, state broadcast
//! - Two tasks per client: framed command reader and queued state writer
//!
//! Networking model:
//! - TCP only, 4-byte big-endian length-prefixed frames in both directions
//! - Payload profile (binary or JSON) fixed per connection
//!
//! Concurrency rules:
//! - Each client's state sits behind its own lock; nothing holds two at once.
//! - The room registry and each member set are owned by a single task and
//!   changed only through its event channel.

pub mod bullet;
pub mod client;
pub mod console;
pub mod error;
pub mod room;
pub mod server;
pub mod state;

pub use error::SessionError;
pub use server::{GameServer, ServerHandle};
