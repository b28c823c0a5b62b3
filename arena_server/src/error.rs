//! Error taxonomy of the session server.
//!
//! `Config` and `Listen` abort startup and `Accept` is logged by the accept loop. Every
//! other variant ends exactly one client and never its room or the server.

use std::{io, time::Duration};

use arena_shared::{
    config::ConfigError,
    ids::ClientId,
    net::{Stage, WireError},
    protocol::ProtocolError,
};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("listen on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("accept: {0}")]
    Accept(#[source] io::Error),
    #[error("read: {0}")]
    Read(#[source] io::Error),
    #[error("write: {0}")]
    Write(#[source] io::Error),
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },
    #[error("peer disconnected")]
    Disconnected,
    #[error("protocol violation: frame of {len} bytes exceeds {max}")]
    Oversized { len: usize, max: usize },
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("protocol violation: command for client {got} on connection of client {expected}")]
    IdMismatch { expected: ClientId, got: ClientId },
}

impl SessionError {
    pub fn listen(addr: impl Into<String>, source: io::Error) -> Self {
        SessionError::Listen {
            addr: addr.into(),
            source,
        }
    }

    /// Maps a framing failure on the inbound side.
    pub fn from_read(e: WireError) -> Self {
        match e {
            WireError::Io(e) => SessionError::Read(e),
            other => Self::from_wire(other),
        }
    }

    /// Maps a framing failure on the outbound side.
    pub fn from_write(e: WireError) -> Self {
        match e {
            WireError::Io(e) => SessionError::Write(e),
            other => Self::from_wire(other),
        }
    }

    fn from_wire(e: WireError) -> Self {
        match e {
            WireError::Closed => SessionError::Disconnected,
            WireError::Timeout { stage, after } => SessionError::Timeout { stage, after },
            WireError::FrameTooLarge { len, max } => SessionError::Oversized { len, max },
            WireError::Io(e) => SessionError::Read(e),
        }
    }

    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            SessionError::Protocol(_) | SessionError::IdMismatch { .. } | SessionError::Oversized { .. }
        )
    }
}
