//! Client implementation.

use std::time::Duration;

use anyhow::{bail, Context};
use arena_shared::{
    ids::ClientId,
    net::{FramedConn, WireError},
    protocol::{
        ClientRecord, Codec, Command, CommandKind, Profile, RoomSnapshot, ServerMessage,
    },
};
use tokio::{net::ToSocketAddrs, time::Instant};
use tracing::{debug, info};

use crate::history::SnapshotHistory;

/// How long `connect` waits for the server's welcome.
pub const WELCOME_TIMEOUT: Duration = Duration::from_secs(5);

const HISTORY_LEN: usize = 32;

pub struct GameClient {
    pub client_id: ClientId,
    /// Our record as of joining: spawn point and size.
    pub spawn: ClientRecord,
    pub snaps: SnapshotHistory,
    conn: FramedConn,
    codec: &'static dyn Codec,
}

impl GameClient {
    /// Connects and waits for the welcome that assigns our id.
    pub async fn connect<A: ToSocketAddrs>(addr: A, profile: Profile) -> anyhow::Result<Self> {
        let mut conn = FramedConn::connect(addr).await.context("connect")?;
        let codec = profile.codec();
        let payload = conn.recv(WELCOME_TIMEOUT).await.context("await welcome")?;
        let spawn = match codec.decode_server(&payload).context("decode welcome")? {
            ServerMessage::Welcome(rec) => rec,
            ServerMessage::RoomState(_) => bail!("room state before welcome"),
        };
        info!(client_id = %spawn.id, x = spawn.x, y = spawn.y, %profile, "Joined");
        Ok(Self {
            client_id: spawn.id,
            spawn,
            snaps: SnapshotHistory::new(HISTORY_LEN),
            conn,
            codec,
        })
    }

    pub fn profile(&self) -> Profile {
        self.codec.profile()
    }

    pub async fn send(&mut self, cmd: &Command) -> anyhow::Result<()> {
        let payload = self.codec.encode_command(cmd)?;
        self.send_payload(&payload).await
    }

    pub async fn send_move(&mut self, x: i16, y: i16, angle: f32) -> anyhow::Result<()> {
        let cmd = self.command(x, y, angle, CommandKind::Move);
        self.send(&cmd).await
    }

    pub async fn send_shoot(&mut self, x: i16, y: i16, angle: f32) -> anyhow::Result<()> {
        let cmd = self.command(x, y, angle, CommandKind::Shoot);
        self.send(&cmd).await
    }

    /// Sends an already encoded payload as one frame.
    pub async fn send_payload(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        self.conn.send(payload).await.context("send frame")
    }

    fn command(&self, x: i16, y: i16, angle: f32, kind: CommandKind) -> Command {
        Command {
            id: self.client_id,
            x,
            y,
            angle,
            kind,
        }
    }

    /// Next server message, or `None` if nothing arrived within `timeout`.
    pub async fn recv(&mut self, timeout: Duration) -> anyhow::Result<Option<ServerMessage>> {
        let payload = match self.conn.recv(timeout).await {
            Ok(payload) => payload,
            Err(WireError::Timeout { .. }) => return Ok(None),
            Err(e) => return Err(e).context("receive frame"),
        };
        let msg = self.codec.decode_server(&payload).context("decode server message")?;
        if let ServerMessage::RoomState(snap) = &msg {
            self.snaps.push(snap.clone());
        }
        Ok(Some(msg))
    }

    /// Reads until a room snapshot satisfies `pred` or `timeout` passes.
    pub async fn wait_for<F>(&mut self, timeout: Duration, pred: F) -> anyhow::Result<Option<RoomSnapshot>>
    where
        F: Fn(&RoomSnapshot) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if let Some(ServerMessage::RoomState(snap)) = self.recv(remaining).await? {
                if pred(&snap) {
                    return Ok(Some(snap));
                }
            }
        }
    }

    /// Drains messages until the server closes the connection.
    ///
    /// Returns false if it is still open after `timeout`.
    pub async fn wait_closed(&mut self, timeout: Duration) -> anyhow::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            match self.conn.recv(remaining).await {
                Ok(_) => continue,
                Err(WireError::Timeout { .. }) => return Ok(false),
                Err(WireError::Closed) | Err(WireError::Io(_)) => return Ok(true),
                Err(e) => return Err(e).context("receive frame"),
            }
        }
    }

    pub async fn close(mut self) {
        if let Err(e) = self.conn.shutdown().await {
            debug!(error = %e, "Shutdown failed");
        }
    }
}
