//! `arena_client`
//!
//! Client-side of the arena protocol:
//! - Framed TCP connection with a per-connection payload profile
//! - Join handshake (the server's welcome carries our id and spawn point)
//! - Command helpers and snapshot history

pub mod client;
pub mod history;

pub use client::GameClient;
