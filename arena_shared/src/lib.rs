//! `arena_shared`
//!
//! Primitives shared by the session server and its clients.
//!
//! Design goals:
//! - One framing layer for both directions (4-byte big-endian length + payload).
//! - Payload profiles selected explicitly, never guessed from message shape.
//! - Ids handed out by injected allocators rather than process-wide statics.
//! - No `unsafe`.

pub mod config;
pub mod ids;
pub mod math;
pub mod net;
pub mod protocol;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::ids::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::protocol::*;
}
