//! Per-client game state.
//!
//! Owned by one `Client` behind its lock. The read pipeline applies
//! commands; the room advances bullets and settles hits.

use std::collections::BTreeMap;

use arena_shared::{
    ids::{BulletId, ClientId, IdAllocator},
    math::{Vec2, WorldBounds},
    protocol::{ClientRecord, ClientStatus, Command, CommandKind, VisualState},
};

use crate::bullet::Bullet;

#[derive(Debug, Clone)]
pub struct ClientState {
    pub id: ClientId,
    pub x: i16,
    pub y: i16,
    /// Facing, in degrees.
    pub angle: f32,
    pub size: u8,
    pub status: ClientStatus,
    pub visual: VisualState,
    pub frags: u32,
    max_bullets: usize,
    bullets: BTreeMap<BulletId, Bullet>,
}

/// Live bullets per client unless configured otherwise.
pub const DEFAULT_MAX_BULLETS: usize = 256;

/// What one client looked like at the end of a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientView {
    pub record: ClientRecord,
    pub bullets: Vec<Bullet>,
}

impl ClientState {
    pub fn new(id: ClientId, x: i16, y: i16, size: u8) -> Self {
        Self {
            id,
            x,
            y,
            angle: 0.0,
            size,
            status: ClientStatus::InGame,
            visual: VisualState::empty(),
            frags: 0,
            max_bullets: DEFAULT_MAX_BULLETS,
            bullets: BTreeMap::new(),
        }
    }

    pub fn with_max_bullets(mut self, max: usize) -> Self {
        self.max_bullets = max;
        self
    }

    pub fn position(&self) -> Vec2 {
        Vec2::new(f64::from(self.x), f64::from(self.y))
    }

    /// Bullets spawn this far from the player's position.
    pub fn radius(&self) -> f64 {
        f64::from(self.size) / 2.0
    }

    /// Applies a command already checked to belong to this client.
    ///
    /// Position and facing are always taken from the command. `SHOOT` then
    /// spawns a bullet from the new position and returns its id, unless the
    /// client has failed or already has `max_bullets` in flight.
    pub fn apply(&mut self, cmd: &Command, ids: &IdAllocator) -> Option<BulletId> {
        debug_assert_eq!(cmd.id, self.id);
        let mut visual = VisualState::empty();
        if cmd.x != self.x || cmd.y != self.y {
            visual |= VisualState::MOVED;
        }
        self.x = cmd.x;
        self.y = cmd.y;
        self.angle = cmd.angle;

        let spawned = match cmd.kind {
            CommandKind::Move => None,
            CommandKind::Shoot
                if self.status == ClientStatus::Failed || self.bullets.len() >= self.max_bullets =>
            {
                None
            }
            CommandKind::Shoot => {
                visual |= VisualState::SHOT;
                let bullet = Bullet::spawn(ids.bullet(), self.position(), self.radius(), self.angle);
                self.bullets.insert(bullet.id, bullet);
                Some(bullet.id)
            }
        };
        self.visual = visual;
        spawned
    }

    /// Moves every bullet by one tick and drops those that left `bounds`.
    ///
    /// Failed clients own no bullets. Returns the number of bullets pruned.
    pub fn advance(&mut self, delta: f64, bounds: WorldBounds) -> usize {
        if self.status == ClientStatus::Failed {
            return 0;
        }
        let mut doomed = Vec::new();
        for bullet in self.bullets.values_mut() {
            bullet.advance(delta);
            if !bounds.contains(bullet.position) {
                doomed.push(bullet.id);
            }
        }
        for id in &doomed {
            self.bullets.remove(id);
        }
        doomed.len()
    }

    /// Credits a hit made with `bullet` and consumes it.
    pub fn record_frag(&mut self, bullet: BulletId) -> bool {
        if self.bullets.remove(&bullet).is_some() {
            self.frags += 1;
            true
        } else {
            false
        }
    }

    /// Ends play for this client; its bullets leave the world with it.
    pub fn mark_failed(&mut self) {
        self.status = ClientStatus::Failed;
        self.bullets.clear();
    }

    pub fn mark_won(&mut self) {
        if self.status == ClientStatus::InGame {
            self.status = ClientStatus::Won;
        }
    }

    pub fn bullet(&self, id: BulletId) -> Option<&Bullet> {
        self.bullets.get(&id)
    }

    pub fn bullet_count(&self) -> usize {
        self.bullets.len()
    }

    pub fn record(&self) -> ClientRecord {
        ClientRecord {
            id: self.id,
            x: self.x,
            y: self.y,
            angle: self.angle,
            size: self.size,
            status: self.status,
            visual_state: self.visual.bits(),
            frags: self.frags,
        }
    }

    pub fn view(&self) -> ClientView {
        ClientView {
            record: self.record(),
            bullets: self.bullets.values().copied().collect(),
        }
    }
}
