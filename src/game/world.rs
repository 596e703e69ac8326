//! Simulation state owned by a match session

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::physics::PhysicsConfig;
use super::Side;
use crate::geometry::{Circle, Segment, Vector2};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ball {
    pub shape: Circle,
    /// Field units per second
    pub velocity: Vector2,
}

impl Ball {
    pub fn position(&self) -> Vector2 {
        self.shape.center
    }
}

/// A player's paddle; the hitbox is its front face
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pad {
    pub hitbox: Segment,
    /// Last movement input, -1 (up) ..= 1 (down)
    pub direction: f64,
}

impl Pad {
    pub fn new(side: Side, config: &PhysicsConfig) -> Self {
        let x = match side {
            Side::Left => config.pad_width,
            Side::Right => config.field_width - config.pad_width,
        };
        let half = config.pad_height / 2.0;
        let center_y = config.field_height / 2.0;
        Self {
            hitbox: Segment::new(Vector2::new(x, center_y - half), Vector2::new(x, center_y + half)),
            direction: 0.0,
        }
    }

    pub fn center(&self) -> Vector2 {
        self.hitbox.midpoint()
    }

    pub fn set_direction(&mut self, direction: f64) {
        self.direction = if direction.is_finite() {
            direction.clamp(-1.0, 1.0)
        } else {
            0.0
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    pub p1: u8,
    pub p2: u8,
    pub max: u8,
}

impl Score {
    pub fn new(max: u8) -> Self {
        Self { p1: 0, p2: 0, max }
    }

    pub fn add_point(&mut self, side: Side) {
        match side {
            Side::Left => self.p1 = self.p1.saturating_add(1),
            Side::Right => self.p2 = self.p2.saturating_add(1),
        }
    }

    #[cfg(test)]
    pub fn of(&self, side: Side) -> u8 {
        match side {
            Side::Left => self.p1,
            Side::Right => self.p2,
        }
    }

    /// Side that reached `max`, if any
    pub fn winner(&self) -> Option<Side> {
        if self.p1 >= self.max {
            Some(Side::Left)
        } else if self.p2 >= self.max {
            Some(Side::Right)
        } else {
            None
        }
    }

    pub fn is_finished(&self) -> bool {
        self.winner().is_some()
    }
}

/// Complete simulation state; `play_tick` maps one `World` to the next
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct World {
    pub ball: Ball,
    pub pads: [Pad; 2],
    pub score: Score,
    /// Monotonic; only reset by creating a new world
    pub tick_count: u64,
    pub seed: u64,
    /// Current multiple of the base ball speed
    pub speed_factor: f64,
}

impl World {
    /// Fresh world with the ball served toward a seed-chosen side
    pub fn new(seed: u64, max_score: u8, config: &PhysicsConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let receiver = if rng.gen::<bool>() { Side::Left } else { Side::Right };
        let mut world = Self {
            ball: Ball {
                shape: Circle::new(config.field_center(), config.ball_radius),
                velocity: Vector2::ZERO,
            },
            pads: [Pad::new(Side::Left, config), Pad::new(Side::Right, config)],
            score: Score::new(max_score),
            tick_count: 0,
            seed,
            speed_factor: 1.0,
        };
        world.serve(receiver, config);
        world
    }

    pub fn pad_mut(&mut self, side: Side) -> &mut Pad {
        &mut self.pads[side.index()]
    }

    /// Reset the ball to the centre, heading toward `receiver`.
    ///
    /// The angle is drawn from `(seed, tick_count)` so replays serve identically.
    pub fn serve(&mut self, receiver: Side, config: &PhysicsConfig) {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ self.tick_count.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let half = config.max_service_angle / 2.0;
        let angle = rng.gen_range(-half..=half);
        let dir_x = match receiver {
            Side::Left => -1.0,
            Side::Right => 1.0,
        };
        self.speed_factor = 1.0;
        self.ball.shape.center = config.field_center();
        self.ball.velocity = Vector2::new(dir_x * angle.cos(), angle.sin()) * config.ball_speed;
    }

    /// Park the ball once the match is decided
    pub fn stop_ball(&mut self, config: &PhysicsConfig) {
        self.ball.shape.center = config.field_center();
        self.ball.velocity = Vector2::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_world_serves_horizontally_enough() {
        let config = PhysicsConfig::default();
        let world = World::new(42, 5, &config);
        let v = world.ball.velocity;
        assert!((v.length() - config.ball_speed).abs() < 1e-9);
        assert!(v.x.abs() >= v.y.abs());
        assert_eq!(world.tick_count, 0);
        assert_eq!(world.ball.position(), config.field_center());
    }

    #[test]
    fn same_seed_same_world() {
        let config = PhysicsConfig::default();
        assert_eq!(World::new(7, 3, &config), World::new(7, 3, &config));
    }

    #[test]
    fn score_winner() {
        let mut score = Score::new(2);
        score.add_point(Side::Right);
        assert_eq!(score.winner(), None);
        score.add_point(Side::Right);
        assert_eq!(score.winner(), Some(Side::Right));
        assert_eq!(score.of(Side::Right), 2);
        assert_eq!(score.of(Side::Left), 0);
    }

    #[test]
    fn pad_direction_is_clamped() {
        let mut pad = Pad::new(Side::Left, &PhysicsConfig::default());
        pad.set_direction(4.0);
        assert_eq!(pad.direction, 1.0);
        pad.set_direction(f64::NAN);
        assert_eq!(pad.direction, 0.0);
    }
}
