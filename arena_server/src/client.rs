//! One connected player.
//!
//! A `Client` owns its game state and two tasks over its connection:
//! - read pipeline: framed command in, state mutation, broadcast request out
//! - write pipeline: drains the bounded outbound queue onto the socket
//!
//! Teardown is exactly-once. Whichever side fails first flips `stopped`,
//! signals both pipelines and tells the room; later failures are no-ops.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use arena_shared::{
    config::Timeouts,
    ids::{BulletId, ClientId, IdAllocator},
    math::WorldBounds,
    net::{read_frame, write_frame, MAX_FRAME_LEN},
    protocol::{ClientStatus, Profile},
};
use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::{
        mpsc::{self, error::TrySendError},
        watch, Notify, RwLock,
    },
};
use tracing::{debug, info, trace, warn};

use crate::{
    error::SessionError,
    room::RoomEvent,
    state::{ClientState, ClientView},
};

/// Everything a room hands to a client it admits.
#[derive(Clone)]
pub struct ClientContext {
    pub room_tx: mpsc::Sender<RoomEvent>,
    /// Coalescing request for an out-of-band room broadcast.
    pub broadcast: Arc<Notify>,
    pub ids: Arc<IdAllocator>,
    pub profile: Profile,
    pub timeouts: Timeouts,
    pub queue_capacity: usize,
}

pub struct Client {
    id: ClientId,
    peer: SocketAddr,
    profile: Profile,
    state: RwLock<ClientState>,
    ids: Arc<IdAllocator>,
    room_tx: mpsc::Sender<RoomEvent>,
    broadcast: Arc<Notify>,
    outbound: mpsc::Sender<Bytes>,
    stop_tx: watch::Sender<bool>,
    stopped: AtomicBool,
    dropped: AtomicU64,
}

impl Client {
    /// Wraps an accepted connection and starts both pipelines.
    pub fn spawn<S>(stream: S, peer: SocketAddr, state: ClientState, ctx: ClientContext) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::channel(ctx.queue_capacity.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);
        let client = Arc::new(Self {
            id: state.id,
            peer,
            profile: ctx.profile,
            state: RwLock::new(state),
            ids: ctx.ids,
            room_tx: ctx.room_tx,
            broadcast: ctx.broadcast,
            outbound: outbound_tx,
            stop_tx,
            stopped: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        });

        let (reader, writer) = tokio::io::split(stream);
        tokio::spawn(read_loop(
            Arc::clone(&client),
            reader,
            stop_rx.clone(),
            ctx.timeouts,
        ));
        tokio::spawn(write_loop(
            Arc::clone(&client),
            writer,
            outbound_rx,
            stop_rx,
            ctx.timeouts.write(),
        ));
        client
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Frames waiting in the outbound queue.
    pub fn queued(&self) -> usize {
        self.outbound.max_capacity() - self.outbound.capacity()
    }

    /// Frames dropped because the outbound queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queues one encoded payload without waiting.
    ///
    /// A full queue drops the payload. Returns whether it was queued.
    pub fn enqueue(&self, payload: Bytes) -> bool {
        if self.is_stopped() {
            return false;
        }
        match self.outbound.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(client_id = %self.id, dropped, "Outbound queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Stops both pipelines and closes the connection without notifying
    /// the room. Returns false if the client was already stopped.
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.stop_tx.send_replace(true);
        true
    }

    /// Tears the client down after a pipeline failure and asks the room to
    /// remove it.
    async fn disconnect(&self, reason: SessionError) {
        if !self.stop() {
            return;
        }
        if reason.is_protocol_violation() {
            warn!(client_id = %self.id, peer = %self.peer, error = %reason, "Client dropped");
        } else {
            info!(client_id = %self.id, peer = %self.peer, reason = %reason, "Client disconnected");
        }
        if self.room_tx.send(RoomEvent::Leave(self.id)).await.is_err() {
            debug!(client_id = %self.id, "Room already gone");
        }
    }

    async fn handle_payload(&self, payload: &[u8]) -> Result<(), SessionError> {
        let cmd = self.profile.codec().decode_command(payload)?;
        if cmd.id != self.id {
            return Err(SessionError::IdMismatch {
                expected: self.id,
                got: cmd.id,
            });
        }
        let spawned = self.state.write().await.apply(&cmd, &self.ids);
        trace!(client_id = %self.id, x = cmd.x, y = cmd.y, kind = ?cmd.kind, bullet = ?spawned, "Command applied");

        self.broadcast.notify_one();
        Ok(())
    }

    pub async fn view(&self) -> ClientView {
        self.state.read().await.view()
    }

    /// Advances bullets by one tick and returns the resulting view.
    pub async fn advance(&self, delta: f64, bounds: WorldBounds) -> ClientView {
        let mut state = self.state.write().await;
        let pruned = state.advance(delta, bounds);
        if pruned > 0 {
            trace!(client_id = %self.id, pruned, "Bullets left the world");
        }
        state.view()
    }

    pub async fn record_frag(&self, bullet: BulletId) -> bool {
        self.state.write().await.record_frag(bullet)
    }

    pub async fn set_status(&self, status: ClientStatus) {
        let mut state = self.state.write().await;
        match status {
            ClientStatus::Failed => state.mark_failed(),
            ClientStatus::Won => state.mark_won(),
            ClientStatus::InGame => state.status = ClientStatus::InGame,
        }
    }
}

/// Resolves once `rx` reads true or its sender is gone.
pub(crate) async fn signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn read_loop<R>(
    client: Arc<Client>,
    mut reader: R,
    mut stop: watch::Receiver<bool>,
    timeouts: Timeouts,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = signalled(&mut stop) => break,
            frame = read_frame(&mut reader, timeouts.read_idle(), timeouts.read_frame(), MAX_FRAME_LEN) => frame,
        };
        let outcome = match frame {
            Ok(payload) => client.handle_payload(&payload).await,
            Err(e) => Err(SessionError::from_read(e)),
        };
        if let Err(e) = outcome {
            client.disconnect(e).await;
            break;
        }
    }
    debug!(client_id = %client.id, "Read pipeline exit");
}

async fn write_loop<W>(
    client: Arc<Client>,
    mut writer: W,
    mut outbound: mpsc::Receiver<Bytes>,
    mut stop: watch::Receiver<bool>,
    deadline: Duration,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let payload = tokio::select! {
            biased;
            _ = signalled(&mut stop) => break,
            payload = outbound.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };
        let written = tokio::select! {
            biased;
            _ = signalled(&mut stop) => break,
            res = write_frame(&mut writer, &payload, deadline) => res,
        };
        if let Err(e) = written {
            client.disconnect(SessionError::from_write(e)).await;
            break;
        }
    }
    let _ = writer.shutdown().await;
    debug!(client_id = %client.id, "Write pipeline exit");
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_shared::{
        net::{encode_frame, WireError, MAX_BROADCAST_LEN},
        protocol::{BinaryCodec, Codec, Command, CommandKind, ServerMessage},
    };
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    const SHORT: Duration = Duration::from_secs(1);

    struct Harness {
        client: Arc<Client>,
        peer: DuplexStream,
        room_rx: mpsc::Receiver<RoomEvent>,
        broadcast: Arc<Notify>,
    }

    fn spawn_client(id: u32, queue_capacity: usize, buf: usize) -> Harness {
        spawn_client_with(id, queue_capacity, buf, Timeouts::default())
    }

    fn spawn_client_with(id: u32, queue_capacity: usize, buf: usize, timeouts: Timeouts) -> Harness {
        let (server_side, peer) = duplex(buf);
        let (room_tx, room_rx) = mpsc::channel(16);
        let broadcast = Arc::new(Notify::new());
        let ctx = ClientContext {
            room_tx,
            broadcast: Arc::clone(&broadcast),
            ids: Arc::new(IdAllocator::default()),
            profile: Profile::Binary,
            timeouts,
            queue_capacity,
        };
        let state = ClientState::new(ClientId(id), 200, 200, 40);
        let client = Client::spawn(server_side, "127.0.0.1:4000".parse().unwrap(), state, ctx);
        Harness {
            client,
            peer,
            room_rx,
            broadcast,
        }
    }

    fn command(id: u32, x: i16, y: i16, kind: CommandKind) -> Bytes {
        let cmd = Command {
            id: ClientId(id),
            x,
            y,
            angle: 0.0,
            kind,
        };
        encode_frame(&BinaryCodec.encode_command(&cmd).unwrap())
    }

    async fn read_reply(peer: &mut DuplexStream) -> Result<Bytes, WireError> {
        read_frame(peer, SHORT, SHORT, MAX_BROADCAST_LEN).await
    }

    #[tokio::test]
    async fn move_updates_state_and_requests_broadcast() {
        let mut h = spawn_client(7, 8, 4096);
        h.peer.write_all(&command(7, 50, 60, CommandKind::Move)).await.unwrap();

        tokio::time::timeout(SHORT, h.broadcast.notified()).await.unwrap();
        let view = h.client.view().await;
        assert_eq!((view.record.x, view.record.y), (50, 60));
        assert!(view.bullets.is_empty());
        assert!(!h.client.is_stopped());
    }

    #[tokio::test]
    async fn command_burst_leaves_room_queue_empty() {
        let mut h = spawn_client(7, 8, 64 * 1024);
        let burst: Vec<u8> = (0..500)
            .flat_map(|i| command(7, i as i16, 0, CommandKind::Move).to_vec())
            .collect();
        h.peer.write_all(&burst).await.unwrap();

        let deadline = tokio::time::Instant::now() + SHORT;
        while h.client.view().await.record.x != 499 {
            assert!(tokio::time::Instant::now() < deadline, "burst not applied");
            tokio::task::yield_now().await;
        }
        // Requests coalesce into one pending wakeup; nothing reaches the room queue.
        tokio::time::timeout(SHORT, h.broadcast.notified()).await.unwrap();
        assert!(h.room_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shoot_spawns_one_bullet() {
        let mut h = spawn_client(3, 8, 4096);
        h.peer.write_all(&command(3, 50, 60, CommandKind::Shoot)).await.unwrap();

        tokio::time::timeout(SHORT, h.broadcast.notified()).await.unwrap();
        let view = h.client.view().await;
        assert_eq!(view.bullets.len(), 1);
        assert_eq!(view.bullets[0].record().x, 50);
        assert_eq!(view.bullets[0].record().y, 80);
    }

    #[tokio::test]
    async fn foreign_id_tears_down_without_mutation() {
        let mut h = spawn_client(7, 8, 4096);
        h.peer.write_all(&command(8, 999, 999, CommandKind::Move)).await.unwrap();

        match h.room_rx.recv().await {
            Some(RoomEvent::Leave(id)) => assert_eq!(id, ClientId(7)),
            _ => panic!("expected leave"),
        }
        assert!(h.client.is_stopped());
        let view = h.client.view().await;
        assert_eq!((view.record.x, view.record.y), (200, 200));

        // Connection is closed from the server side.
        assert!(matches!(read_reply(&mut h.peer).await, Err(WireError::Closed)));
    }

    #[tokio::test]
    async fn malformed_payload_tears_down() {
        let mut h = spawn_client(1, 8, 4096);
        h.peer.write_all(&encode_frame(&[0x7f, 1, 2])).await.unwrap();
        assert!(matches!(h.room_rx.recv().await, Some(RoomEvent::Leave(_))));
        assert!(h.client.is_stopped());
    }

    #[tokio::test]
    async fn peer_close_sends_single_leave() {
        let Harness {
            client,
            peer,
            mut room_rx,
            ..
        } = spawn_client(5, 8, 4096);
        drop(peer);
        assert!(matches!(room_rx.recv().await, Some(RoomEvent::Leave(id)) if id == ClientId(5)));
        assert!(client.is_stopped());
        assert!(!client.stop());

        // Both pipelines are gone and nobody else reports the client.
        let extra = tokio::time::timeout(Duration::from_millis(100), room_rx.recv()).await;
        assert!(!matches!(extra, Ok(Some(_))));
    }

    #[tokio::test]
    async fn stalled_write_tears_down() {
        let timeouts = Timeouts {
            write_ms: 50,
            ..Timeouts::default()
        };
        // The peer never reads, so the 8-byte pipe fills mid-frame.
        let mut h = spawn_client_with(6, 8, 8, timeouts);
        assert!(h.client.enqueue(Bytes::from(vec![1u8; 64])));

        match tokio::time::timeout(SHORT, h.room_rx.recv()).await {
            Ok(Some(RoomEvent::Leave(id))) => assert_eq!(id, ClientId(6)),
            _ => panic!("expected leave after write deadline"),
        }
        assert!(h.client.is_stopped());
        assert!(!h.client.enqueue(Bytes::from_static(b"late")));

        // The read side stopped too: a valid command no longer applies.
        let cmd = command(6, 1, 1, CommandKind::Move);
        let write = h.peer.write_all(&cmd);
        let _ = tokio::time::timeout(Duration::from_millis(100), write).await;
        let view = h.client.view().await;
        assert_eq!((view.record.x, view.record.y), (200, 200));
    }

    #[tokio::test]
    async fn queued_frames_reach_the_peer() {
        let mut h = spawn_client(2, 8, 4096);
        let welcome = ServerMessage::Welcome(h.client.view().await.record);
        assert!(h.client.enqueue(BinaryCodec.encode_server(&welcome).unwrap()));

        let payload = read_reply(&mut h.peer).await.unwrap();
        assert_eq!(BinaryCodec.decode_server(&payload).unwrap(), welcome);
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let h = spawn_client(4, 2, 8);
        let frame = Bytes::from_static(&[0u8; 16]);
        // Current-thread runtime: the write pipeline cannot drain until we yield.
        let accepted = (0..10).filter(|_| h.client.enqueue(frame.clone())).count();
        assert_eq!(accepted, 2);
        assert_eq!(h.client.queued(), 2);
        assert_eq!(h.client.dropped_frames(), 8);
        assert!(!h.client.is_stopped());
    }

    #[tokio::test]
    async fn stop_closes_connection_silently() {
        let mut h = spawn_client(9, 8, 4096);
        assert!(h.client.stop());
        assert!(!h.client.enqueue(Bytes::from_static(b"late")));

        assert!(matches!(read_reply(&mut h.peer).await, Err(WireError::Closed)));
        let leave = tokio::time::timeout(Duration::from_millis(100), h.room_rx.recv()).await;
        assert!(!matches!(leave, Ok(Some(_))));
    }
}
