//! Configuration system.
//!
//! Loads server configuration from JSON strings/files. Every field has a
//! default, so a partial file only overrides what it names.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    math::WorldBounds,
    net::MAX_BROADCAST_LEN,
    protocol::{max_room_state_len, Profile},
};

/// Root configuration of one server process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, e.g. `0.0.0.0:9999`.
    pub listen_addr: String,
    /// Fixed simulation tick rate per room.
    pub tick_hz: u32,
    /// Maximum members per room.
    pub room_capacity: usize,
    /// World extent used for bullet pruning.
    pub world: WorldBounds,
    /// Side of a player's square; bullets spawn at half of it.
    pub player_size: u8,
    /// Pending outbound frames per client before new ones are dropped.
    pub outbound_queue: usize,
    /// Payload profile for new connections.
    pub profile: Profile,
    /// Spawn coordinates are drawn from `spawn_min..spawn_max` on both axes.
    pub spawn_min: i16,
    pub spawn_max: i16,
    /// Live bullets per client; further shots are ignored.
    pub max_bullets: usize,
    pub timeouts: Timeouts,
}

/// Connection deadlines, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Wait for the next length prefix.
    pub read_idle_ms: u64,
    /// Wait for the payload once its length is known.
    pub read_frame_ms: u64,
    /// Write of one whole frame.
    pub write_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read_idle_ms: 5 * 60 * 1000,
            read_frame_ms: 30 * 1000,
            write_ms: 30 * 1000,
        }
    }
}

impl Timeouts {
    pub fn read_idle(&self) -> Duration {
        Duration::from_millis(self.read_idle_ms)
    }

    pub fn read_frame(&self) -> Duration {
        Duration::from_millis(self.read_frame_ms)
    }

    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9999".to_string(),
            tick_hz: 30,
            room_capacity: 8,
            world: WorldBounds::default(),
            player_size: 40,
            outbound_queue: 100,
            profile: Profile::Binary,
            spawn_min: 100,
            spawn_max: 300,
            max_bullets: 256,
            timeouts: Timeouts::default(),
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let cfg = Self::from_json_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects values the wire format cannot carry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limit = i16::MAX as u16;
        if self.world.width > limit || self.world.height > limit {
            return Err(ConfigError::Invalid(format!(
                "world {}x{} exceeds the {limit} coordinate limit",
                self.world.width, self.world.height
            )));
        }
        let worst = max_room_state_len(
            self.room_capacity,
            self.room_capacity.saturating_mul(self.max_bullets),
        );
        if worst > MAX_BROADCAST_LEN {
            return Err(ConfigError::Invalid(format!(
                "room of {} with {} bullets each may broadcast {worst} bytes, limit is {MAX_BROADCAST_LEN}",
                self.room_capacity, self.max_bullets
            )));
        }
        Ok(())
    }

    /// Fixed simulation step in seconds.
    pub fn tick_delta(&self) -> f64 {
        1.0 / f64::from(self.tick_hz.max(1))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(self.tick_delta())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = ServerConfig::from_json_str(
            r#"{"tick_hz": 60, "profile": "json", "timeouts": {"write_ms": 500}}"#,
        )
        .unwrap();
        assert_eq!(cfg.tick_hz, 60);
        assert_eq!(cfg.profile, Profile::Json);
        assert_eq!(cfg.timeouts.write(), Duration::from_millis(500));
        assert_eq!(cfg.timeouts.read_idle(), Duration::from_secs(300));
        assert_eq!(cfg.room_capacity, 8);
        assert_eq!(cfg.listen_addr, "0.0.0.0:9999");
    }

    #[test]
    fn tick_delta_never_divides_by_zero() {
        let cfg = ServerConfig {
            tick_hz: 0,
            ..Default::default()
        };
        assert_eq!(cfg.tick_delta(), 1.0);
    }

    #[test]
    fn defaults_validate() {
        ServerConfig::default().validate().unwrap();
    }

    #[test]
    fn world_must_fit_wire_coordinates() {
        let mut cfg = ServerConfig::default();
        cfg.world = WorldBounds {
            width: 32767,
            height: 32767,
        };
        cfg.validate().unwrap();

        cfg.world.width = 40000;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn broadcast_must_fit_client_limit() {
        let cfg = ServerConfig {
            room_capacity: 1000,
            max_bullets: 1000,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }
}
