//! Projectiles.

use std::f64::consts::{FRAC_PI_2, PI};

use arena_shared::{ids::BulletId, math::Vec2, protocol::BulletRecord};

/// Speed of every bullet, in world units per second.
pub const BULLET_INITIAL_SPEED: f64 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bullet {
    pub id: BulletId,
    pub position: Vec2,
    pub velocity: Vec2,
}

impl Bullet {
    /// Spawns a bullet `radius` away from `origin`.
    ///
    /// Angle 0 points along +y: the facing angle is rotated by 90 degrees
    /// before it is turned into a direction.
    pub fn spawn(id: BulletId, origin: Vec2, radius: f64, angle_deg: f32) -> Self {
        let angle_rad = f64::from(angle_deg) / 180.0 * PI + FRAC_PI_2;
        let dir = Vec2::from_angle(angle_rad);
        Self {
            id,
            position: origin.add(dir.scale(radius)),
            velocity: dir.scale(BULLET_INITIAL_SPEED),
        }
    }

    /// Explicit Euler step.
    pub fn advance(&mut self, delta: f64) {
        self.position = self.position.add(self.velocity.scale(delta));
    }

    pub fn record(&self) -> BulletRecord {
        BulletRecord {
            id: self.id,
            x: self.position.x as i16,
            y: self.position.y as i16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn facing_zero_fires_along_y() {
        let b = Bullet::spawn(BulletId(1), Vec2::new(50.0, 60.0), 20.0, 0.0);
        assert!(close(b.position.x, 50.0));
        assert!(close(b.position.y, 80.0));
        assert!(close(b.velocity.x, 0.0));
        assert!(close(b.velocity.y, 120.0));
    }

    #[test]
    fn facing_ninety_fires_along_negative_x() {
        let b = Bullet::spawn(BulletId(1), Vec2::ZERO, 10.0, 90.0);
        assert!(close(b.position.x, -10.0));
        assert!(close(b.position.y, 0.0));
        assert!(close(b.velocity.len(), BULLET_INITIAL_SPEED));
    }

    #[test]
    fn advance_is_velocity_times_delta() {
        let mut b = Bullet {
            id: BulletId(3),
            position: Vec2::new(10.0, 20.0),
            velocity: Vec2::new(30.0, -60.0),
        };
        let before = b.position;
        b.advance(0.5);
        assert_eq!(b.position, Vec2::new(before.x + 15.0, before.y - 30.0));
    }

    #[test]
    fn record_truncates_coordinates() {
        let b = Bullet {
            id: BulletId(4),
            position: Vec2::new(12.9, -3.7),
            velocity: Vec2::ZERO,
        };
        let r = b.record();
        assert_eq!((r.id, r.x, r.y), (BulletId(4), 12, -3));
    }
}
