//! Snapshot history.
//!
//! The server sends room snapshots at tick boundaries and after commands.
//! The client keeps the last few.

use std::collections::VecDeque;

use arena_shared::{
    ids::ClientId,
    protocol::{ClientRecord, RoomSnapshot},
};

pub struct SnapshotHistory {
    history: VecDeque<RoomSnapshot>,
    max: usize,
}

impl SnapshotHistory {
    pub fn new(max: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(max),
            max: max.max(1),
        }
    }

    pub fn push(&mut self, snap: RoomSnapshot) {
        self.history.push_back(snap);
        while self.history.len() > self.max {
            self.history.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn last(&self) -> Option<&RoomSnapshot> {
        self.history.back()
    }

    /// Latest known record of `id`.
    pub fn latest_client(&self, id: ClientId) -> Option<&ClientRecord> {
        self.history.back().and_then(|s| s.client(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_shared::protocol::ClientStatus;

    fn snap(tick: u32, x: i16, y: i16) -> RoomSnapshot {
        RoomSnapshot {
            tick,
            clients: vec![ClientRecord {
                id: ClientId(1),
                x,
                y,
                angle: 0.0,
                size: 40,
                status: ClientStatus::InGame,
                visual_state: 0,
                frags: 0,
            }],
            bullets: Vec::new(),
        }
    }

    #[test]
    fn keeps_only_newest() {
        let mut h = SnapshotHistory::new(2);
        for tick in 1..=5 {
            h.push(snap(tick, 0, 0));
        }
        assert_eq!(h.len(), 2);
        assert_eq!(h.last().map(|s| s.tick), Some(5));
    }

    #[test]
    fn latest_client_reads_newest_snapshot() {
        let mut h = SnapshotHistory::new(4);
        assert!(h.latest_client(ClientId(1)).is_none());
        h.push(snap(1, 0, 0));
        h.push(snap(2, 100, 50));
        assert_eq!(h.latest_client(ClientId(1)).map(|c| (c.x, c.y)), Some((100, 50)));
        assert!(h.latest_client(ClientId(9)).is_none());
    }
}
