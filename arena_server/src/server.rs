//! Listener, accept loop and room registry.
//!
//! The accept loop only accepts. Every accepted connection becomes a
//! `ServerEvent` for the dispatcher, which owns the room registry and is
//! the only place rooms are created, filled and removed.

use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use arena_shared::{
    config::ServerConfig,
    ids::{IdAllocator, RoomId},
};
use serde::Serialize;
use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    sync::{mpsc, oneshot, watch},
};
use tracing::{debug, info, warn};

use crate::{
    client::signalled,
    error::SessionError,
    room::{GameRoom, RoomHandle},
};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

const LISTEN_BACKLOG: u32 = 1024;

pub enum ServerEvent {
    /// A freshly accepted connection waiting for a room.
    Connection { stream: TcpStream, peer: SocketAddr },
    /// A room lost its last member.
    RoomEmpty(RoomId),
    /// Registry snapshot request.
    Status(oneshot::Sender<ServerStatus>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomStatus {
    pub id: RoomId,
    pub members: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub rooms: Vec<RoomStatus>,
}

impl ServerStatus {
    pub fn members(&self) -> usize {
        self.rooms.iter().map(|r| r.members).sum()
    }
}

/// Cloneable control surface of a running server.
#[derive(Clone)]
pub struct ServerHandle {
    events: mpsc::UnboundedSender<ServerEvent>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ServerHandle {
    /// Current rooms and their occupancy, or `None` once the server stopped.
    pub async fn status(&self) -> Option<ServerStatus> {
        let (tx, rx) = oneshot::channel();
        self.events.send(ServerEvent::Status(tx)).ok()?;
        rx.await.ok()
    }

    /// Stops accepting, then stops every room and client. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

pub struct GameServer {
    cfg: Arc<ServerConfig>,
    listener: TcpListener,
    ids: Arc<IdAllocator>,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl GameServer {
    /// Binds the listener with keep-alive enabled for accepted sockets.
    pub async fn bind(cfg: ServerConfig) -> Result<Self, SessionError> {
        cfg.validate()?;
        let addr: SocketAddr = cfg.listen_addr.parse().map_err(|e| {
            SessionError::listen(
                cfg.listen_addr.clone(),
                io::Error::new(io::ErrorKind::InvalidInput, e),
            )
        })?;
        let listener = listen(addr).map_err(|e| SessionError::listen(cfg.listen_addr.clone(), e))?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            cfg: Arc::new(cfg),
            listener,
            ids: Arc::new(IdAllocator::default()),
            events_tx,
            events_rx,
            shutdown: Arc::new(shutdown),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SessionError> {
        self.listener
            .local_addr()
            .map_err(|e| SessionError::listen(self.cfg.listen_addr.clone(), e))
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            events: self.events_tx.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Runs until shutdown is signalled.
    ///
    /// Teardown order: listener, then rooms, each room stopping its clients.
    pub async fn run(self) {
        let GameServer {
            cfg,
            listener,
            ids,
            events_tx,
            mut events_rx,
            shutdown,
        } = self;

        let accept_task = tokio::spawn(accept_loop(
            listener,
            events_tx.clone(),
            shutdown.subscribe(),
        ));
        let mut registry = Registry {
            cfg,
            ids,
            events_tx,
            shutdown: Arc::clone(&shutdown),
            rooms: HashMap::new(),
        };

        let mut stop = shutdown.subscribe();
        loop {
            tokio::select! {
                biased;
                _ = signalled(&mut stop) => break,
                event = events_rx.recv() => match event {
                    Some(event) => registry.dispatch(event).await,
                    None => break,
                },
            }
        }

        shutdown.send_replace(true);
        if let Err(e) = accept_task.await {
            warn!(error = %e, "Accept task failed");
        }
        let rooms = registry.rooms.len();
        for (_, room) in registry.rooms.drain() {
            room.join().await;
        }
        info!(rooms, "Server stopped");
    }
}

fn listen(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.set_keepalive(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

async fn accept_loop(
    listener: TcpListener,
    events: mpsc::UnboundedSender<ServerEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = signalled(&mut shutdown) => break,
            res = listener.accept() => res,
        };
        match accepted {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%peer, error = %e, "set_nodelay failed");
                }
                debug!(%peer, "Connection accepted");
                if events.send(ServerEvent::Connection { stream, peer }).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %SessionError::Accept(e), "Accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    drop(listener);
    info!("Listener closed");
}

/// Room registry, owned by the dispatch loop.
struct Registry {
    cfg: Arc<ServerConfig>,
    ids: Arc<IdAllocator>,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    shutdown: Arc<watch::Sender<bool>>,
    rooms: HashMap<RoomId, RoomHandle>,
}

impl Registry {
    async fn dispatch(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connection { stream, peer } => self.assign(stream, peer).await,
            ServerEvent::RoomEmpty(id) => self.remove_if_empty(id).await,
            ServerEvent::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    /// Places a connection in the lowest-id room with a free slot, creating
    /// a room when all are full.
    async fn assign(&mut self, stream: TcpStream, peer: SocketAddr) {
        let mut ids: Vec<RoomId> = self.rooms.keys().copied().collect();
        ids.sort_unstable();
        let reserved = ids
            .into_iter()
            .find(|id| self.rooms.get(id).is_some_and(|r| r.slots().try_reserve()));
        let room_id = match reserved {
            Some(id) => id,
            None => self.create_room(),
        };
        let Some(room) = self.rooms.get(&room_id) else {
            return;
        };
        if !room.admit(Box::new(stream), peer).await {
            warn!(room_id = %room_id, %peer, "Room unavailable, connection dropped");
        }
    }

    /// Starts a room with one slot already reserved.
    fn create_room(&mut self) -> RoomId {
        let id = self.ids.room();
        let room = GameRoom::start(
            id,
            Arc::clone(&self.cfg),
            Arc::clone(&self.ids),
            self.events_tx.clone(),
            self.shutdown.subscribe(),
        );
        room.slots().try_reserve();
        info!(room_id = %id, rooms = self.rooms.len() + 1, "Room created");
        self.rooms.insert(id, room);
        id
    }

    /// Drops a room that reported itself empty, unless a connection was
    /// assigned to it in the meantime.
    async fn remove_if_empty(&mut self, id: RoomId) {
        match self.rooms.get(&id) {
            Some(room) if room.slots().occupied() == 0 => {}
            Some(_) => {
                debug!(room_id = %id, "Room refilled before removal");
                return;
            }
            None => return,
        }
        if let Some(room) = self.rooms.remove(&id) {
            room.close().await;
            info!(room_id = %id, rooms = self.rooms.len(), "Room removed");
        }
    }

    fn status(&self) -> ServerStatus {
        let mut rooms: Vec<RoomStatus> = self
            .rooms
            .values()
            .map(|r| RoomStatus {
                id: r.id(),
                members: r.slots().occupied(),
                capacity: r.slots().capacity(),
            })
            .collect();
        rooms.sort_by_key(|r| r.id);
        ServerStatus { rooms }
    }
}
