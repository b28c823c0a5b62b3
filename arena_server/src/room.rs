//! Rooms.
//!
//! Each room is one task that owns its member set and runs a fixed-tick
//! loop. Per tick, in order:
//! 1. advance every live member's bullets and prune the ones out of bounds
//! 2. resolve bullet hits against other members and settle the winner
//! 3. broadcast the room snapshot to every live member
//!
//! Occupancy is tracked separately in [`RoomSlots`]: the server reserves a
//! slot before it hands a connection over and the room releases it when
//! the member leaves.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use arena_shared::{
    config::ServerConfig,
    ids::{BulletId, ClientId, IdAllocator, RoomId},
    protocol::{ClientRecord, ClientStatus, Profile, RoomSnapshot, ServerMessage},
};
use bytes::Bytes;
use rand::Rng;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, watch, Notify},
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    client::{signalled, Client, ClientContext},
    server::ServerEvent,
    state::{ClientState, ClientView},
};

/// Any bidirectional byte stream a client can run over.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub enum RoomEvent {
    /// Admit a connection. Its slot is already reserved.
    Join {
        conn: Box<dyn Connection>,
        peer: SocketAddr,
    },
    /// Remove a member whose connection failed.
    Leave(ClientId),
    /// The server dropped this room from its registry.
    Close,
}

/// Capacity accounting shared by the server and one room.
#[derive(Debug)]
pub struct RoomSlots {
    capacity: usize,
    occupied: AtomicUsize,
}

impl RoomSlots {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            occupied: AtomicUsize::new(0),
        }
    }

    /// Claims a slot if one is free.
    pub fn try_reserve(&self) -> bool {
        self.occupied
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok()
    }

    /// Returns a slot. Returns the remaining occupancy.
    pub fn release(&self) -> usize {
        match self
            .occupied
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(prev) => prev - 1,
            Err(_) => 0,
        }
    }

    pub fn occupied(&self) -> usize {
        self.occupied.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.occupied() >= self.capacity
    }
}

/// Server-side handle to a running room.
pub struct RoomHandle {
    id: RoomId,
    slots: Arc<RoomSlots>,
    tx: mpsc::Sender<RoomEvent>,
    task: JoinHandle<()>,
}

impl RoomHandle {
    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn slots(&self) -> &RoomSlots {
        &self.slots
    }

    /// Hands a connection whose slot was reserved to the room.
    ///
    /// On failure the slot is released again.
    pub async fn admit(&self, conn: Box<dyn Connection>, peer: SocketAddr) -> bool {
        if self.tx.send(RoomEvent::Join { conn, peer }).await.is_err() {
            self.slots.release();
            return false;
        }
        true
    }

    /// Asks the room to stop. It exits once the event is processed.
    pub async fn close(&self) {
        let _ = self.tx.send(RoomEvent::Close).await;
    }

    /// Waits for the room task to finish.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(room_id = %self.id, error = %e, "Room task failed");
        }
    }
}

/// A hit found during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub shooter: ClientId,
    pub bullet: BulletId,
    pub target: ClientId,
}

/// Finds bullets that landed inside another in-game player's square.
///
/// Each target is hit at most once per tick; a bullet never hits its own
/// shooter. Views are scanned in order, so earlier shooters win ties.
pub fn resolve_hits(views: &[ClientView]) -> Vec<Hit> {
    let mut downed: HashSet<ClientId> = HashSet::new();
    let mut hits = Vec::new();
    for shooter in views {
        for bullet in &shooter.bullets {
            let target = views.iter().find(|t| {
                t.record.id != shooter.record.id
                    && t.record.status == ClientStatus::InGame
                    && !downed.contains(&t.record.id)
                    && covers(&t.record, bullet.position.x, bullet.position.y)
            });
            if let Some(target) = target {
                downed.insert(target.record.id);
                hits.push(Hit {
                    shooter: shooter.record.id,
                    bullet: bullet.id,
                    target: target.record.id,
                });
            }
        }
    }
    hits
}

fn covers(rec: &ClientRecord, x: f64, y: f64) -> bool {
    let half = f64::from(rec.size) / 2.0;
    (x - f64::from(rec.x)).abs() <= half && (y - f64::from(rec.y)).abs() <= half
}

/// The last in-game player of a room that had at least two members.
pub fn last_standing(views: &[ClientView]) -> Option<ClientId> {
    if views.len() < 2 {
        return None;
    }
    let mut in_game = views
        .iter()
        .filter(|v| v.record.status == ClientStatus::InGame);
    match (in_game.next(), in_game.next()) {
        (Some(only), None) => Some(only.record.id),
        _ => None,
    }
}

pub struct GameRoom {
    id: RoomId,
    cfg: Arc<ServerConfig>,
    ids: Arc<IdAllocator>,
    slots: Arc<RoomSlots>,
    members: BTreeMap<ClientId, Arc<Client>>,
    events_tx: mpsc::Sender<RoomEvent>,
    events_rx: mpsc::Receiver<RoomEvent>,
    broadcast: Arc<Notify>,
    server_tx: mpsc::UnboundedSender<ServerEvent>,
    shutdown: watch::Receiver<bool>,
    tick: u32,
}

impl GameRoom {
    /// Spawns the room task.
    pub fn start(
        id: RoomId,
        cfg: Arc<ServerConfig>,
        ids: Arc<IdAllocator>,
        server_tx: mpsc::UnboundedSender<ServerEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> RoomHandle {
        let slots = Arc::new(RoomSlots::new(cfg.room_capacity));
        // Pending joins plus members never exceed capacity, each member sends
        // at most one Leave and the registry sends one Close: sends never wait.
        let queue = cfg.room_capacity.max(1).saturating_mul(2).saturating_add(1);
        let (events_tx, events_rx) = mpsc::channel(queue);
        let room = GameRoom {
            id,
            cfg,
            ids,
            slots: Arc::clone(&slots),
            members: BTreeMap::new(),
            events_tx: events_tx.clone(),
            events_rx,
            broadcast: Arc::new(Notify::new()),
            server_tx,
            shutdown,
            tick: 0,
        };
        let task = tokio::spawn(room.run());
        RoomHandle {
            id,
            slots,
            tx: events_tx,
            task,
        }
    }

    async fn run(mut self) {
        let mut ticker = interval(self.cfg.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick fires immediately.
        ticker.tick().await;
        info!(room_id = %self.id, capacity = self.slots.capacity(), "Room started");

        loop {
            tokio::select! {
                biased;
                _ = signalled(&mut self.shutdown) => break,
                _ = ticker.tick() => self.step().await,
                _ = self.broadcast.notified() => self.broadcast_state().await,
                event = self.events_rx.recv() => match event {
                    Some(RoomEvent::Join { conn, peer }) => self.join(conn, peer),
                    Some(RoomEvent::Leave(id)) => self.leave(id),
                    Some(RoomEvent::Close) | None => break,
                },
            }
        }

        for client in self.members.values() {
            client.stop();
        }
        info!(room_id = %self.id, members = self.members.len(), ticks = self.tick, "Room stopped");
    }

    fn spawn_point(&self) -> (i16, i16) {
        let (lo, hi) = (self.cfg.spawn_min, self.cfg.spawn_max);
        if lo >= hi {
            return (lo, lo);
        }
        let mut rng = rand::thread_rng();
        (rng.gen_range(lo..hi), rng.gen_range(lo..hi))
    }

    fn join(&mut self, conn: Box<dyn Connection>, peer: SocketAddr) {
        let id = self.ids.client();
        let (x, y) = self.spawn_point();
        let state =
            ClientState::new(id, x, y, self.cfg.player_size).with_max_bullets(self.cfg.max_bullets);
        let welcome = ServerMessage::Welcome(state.record());
        let ctx = ClientContext {
            room_tx: self.events_tx.clone(),
            broadcast: Arc::clone(&self.broadcast),
            ids: Arc::clone(&self.ids),
            profile: self.cfg.profile,
            timeouts: self.cfg.timeouts,
            queue_capacity: self.cfg.outbound_queue,
        };
        let client = Client::spawn(conn, peer, state, ctx);
        match client.profile().codec().encode_server(&welcome) {
            Ok(payload) => {
                client.enqueue(payload);
            }
            Err(e) => warn!(client_id = %id, error = %e, "Welcome encode failed"),
        }
        self.members.insert(id, client);
        info!(
            room_id = %self.id,
            client_id = %id,
            %peer,
            x,
            y,
            members = self.members.len(),
            "Client joined room"
        );
    }

    fn leave(&mut self, id: ClientId) {
        if self.members.remove(&id).is_none() {
            return;
        }
        let remaining = self.slots.release();
        info!(room_id = %self.id, client_id = %id, members = remaining, "Client left room");
        if self.members.is_empty() && self.server_tx.send(ServerEvent::RoomEmpty(self.id)).is_err() {
            debug!(room_id = %self.id, "Server gone, room empty");
        }
    }

    fn live_members(&self) -> impl Iterator<Item = &Arc<Client>> {
        self.members.values().filter(|c| !c.is_stopped())
    }

    async fn step(&mut self) {
        self.tick = self.tick.wrapping_add(1);
        if self.members.is_empty() {
            return;
        }

        let delta = self.cfg.tick_delta();
        let mut views = Vec::with_capacity(self.members.len());
        for client in self.live_members() {
            views.push(client.advance(delta, self.cfg.world).await);
        }

        let hits = resolve_hits(&views);
        for hit in &hits {
            if let Some(shooter) = self.members.get(&hit.shooter) {
                shooter.record_frag(hit.bullet).await;
            }
            if let Some(target) = self.members.get(&hit.target) {
                target.set_status(ClientStatus::Failed).await;
            }
            for view in views.iter_mut() {
                if view.record.id == hit.shooter {
                    view.bullets.retain(|b| b.id != hit.bullet);
                    view.record.frags += 1;
                } else if view.record.id == hit.target {
                    view.record.status = ClientStatus::Failed;
                    view.bullets.clear();
                }
            }
            info!(room_id = %self.id, shooter = %hit.shooter, target = %hit.target, bullet = %hit.bullet, "Hit");
        }

        if !hits.is_empty() {
            if let Some(winner) = last_standing(&views) {
                if let Some(client) = self.members.get(&winner) {
                    client.set_status(ClientStatus::Won).await;
                }
                for view in views.iter_mut().filter(|v| v.record.id == winner) {
                    view.record.status = ClientStatus::Won;
                }
                info!(room_id = %self.id, client_id = %winner, "Last player standing");
            }
        }

        self.broadcast(&ServerMessage::RoomState(self.snapshot(views)));
    }

    /// Out-of-band broadcast after a command: current state, no advance.
    async fn broadcast_state(&self) {
        let mut views = Vec::with_capacity(self.members.len());
        for client in self.live_members() {
            views.push(client.view().await);
        }
        if views.is_empty() {
            return;
        }
        self.broadcast(&ServerMessage::RoomState(self.snapshot(views)));
    }

    fn snapshot(&self, views: Vec<ClientView>) -> RoomSnapshot {
        let mut snap = RoomSnapshot {
            tick: self.tick,
            clients: Vec::with_capacity(views.len()),
            bullets: Vec::new(),
        };
        for view in views {
            snap.clients.push(view.record);
            snap.bullets.extend(view.bullets.iter().map(|b| b.record()));
        }
        snap
    }

    /// Encodes `msg` once per profile in use and queues it to every live
    /// member.
    fn broadcast(&self, msg: &ServerMessage) {
        let mut encoded: HashMap<Profile, Bytes> = HashMap::new();
        for client in self.live_members() {
            let profile = client.profile();
            let payload = match encoded.get(&profile) {
                Some(payload) => payload.clone(),
                None => match profile.codec().encode_server(msg) {
                    Ok(payload) => {
                        encoded.insert(profile, payload.clone());
                        payload
                    }
                    Err(e) => {
                        warn!(room_id = %self.id, %profile, error = %e, "Broadcast encode failed");
                        continue;
                    }
                },
            };
            client.enqueue(payload);
        }
    }
}
