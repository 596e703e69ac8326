//! Ball and pad physics
//!
//! The field spans `0..field_width` horizontally and `0..field_height`
//! vertically, y growing downward. Player 1 defends the left goal line,
//! player 2 the right one.

use std::f64::consts::{FRAC_PI_3, FRAC_PI_6};

use super::world::{Pad, World};
use super::Side;
use crate::geometry::{Segment, Shape, Vector2};
use crate::util::time::tick_delta;

/// Width / height of the field
pub const RATIO: f64 = 1.3;
pub const BALL_RADIUS: f64 = 0.0085;
pub const PAD_WIDTH: f64 = 0.015;
pub const PAD_HEIGHT: f64 = 0.100;
pub const BALL_MOVEMENT_PER_SECOND: f64 = 1.15;
pub const PAD_MOVEMENT_PER_SECOND: f64 = 1.5;
/// Full amplitude of serve angles
pub const MAX_SERVICE_ANGLE_AMPL: f64 = FRAC_PI_6;
/// Full amplitude of pad re-aim angles
pub const PAD_BOUNCE_ANGLE_AMPL: f64 = FRAC_PI_3;

/// Field geometry and speeds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsConfig {
    pub field_width: f64,
    pub field_height: f64,
    pub ball_radius: f64,
    pub pad_width: f64,
    pub pad_height: f64,
    /// Base ball speed (units per second)
    pub ball_speed: f64,
    /// Pad speed (units per second)
    pub pad_speed: f64,
    /// Speed multiplier applied on every pad hit
    pub paddle_speed_up: f64,
    /// Cap on the accumulated speed multiplier
    pub max_speed_factor: f64,
    pub max_service_angle: f64,
    pub pad_bounce_angle: f64,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            field_width: RATIO,
            field_height: 1.0,
            ball_radius: BALL_RADIUS,
            pad_width: PAD_WIDTH,
            pad_height: PAD_HEIGHT,
            ball_speed: BALL_MOVEMENT_PER_SECOND,
            pad_speed: PAD_MOVEMENT_PER_SECOND,
            paddle_speed_up: 1.05,
            max_speed_factor: 2.5,
            max_service_angle: MAX_SERVICE_ANGLE_AMPL,
            pad_bounce_angle: PAD_BOUNCE_ANGLE_AMPL,
        }
    }
}

impl PhysicsConfig {
    pub fn field_center(&self) -> Vector2 {
        Vector2::new(self.field_width / 2.0, self.field_height / 2.0)
    }

    fn top_wall(&self) -> Segment {
        Segment::new(Vector2::ZERO, Vector2::new(self.field_width, 0.0))
    }

    fn bottom_wall(&self) -> Segment {
        Segment::new(
            Vector2::new(self.field_width, self.field_height),
            Vector2::new(0.0, self.field_height),
        )
    }
}

/// Something that happened during a tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhysicsEvent {
    WallBounce,
    PadBounce { side: Side, speed_factor: f64 },
    /// `scorer` gained a point; the ball was re-served unless the match is decided
    Goal { scorer: Side },
}

/// Result of advancing one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub world: World,
    pub events: Vec<PhysicsEvent>,
}

impl TickOutcome {
    /// Whether the ball's velocity differs from the previous tick
    pub fn velocity_changed(&self) -> bool {
        !self.events.is_empty()
    }

    pub fn scored(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, PhysicsEvent::Goal { .. }))
    }
}

/// Deterministic physics stepper
#[derive(Debug, Clone, Copy, Default)]
pub struct PhysicsEngine {
    config: PhysicsConfig,
}

impl PhysicsEngine {
    pub fn new(config: PhysicsConfig) -> Self {
        Self { config }
    }

    #[cfg(test)]
    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    /// Advance `world` by one tick. Pure: the same input always yields the same outcome.
    pub fn play_tick(&self, world: &World) -> TickOutcome {
        let mut next = *world;
        let mut events = Vec::new();
        let dt = tick_delta();

        for pad in next.pads.iter_mut() {
            self.move_pad(pad, dt);
        }

        if !next.score.is_finished() {
            // Sub-steps no longer than half the radius so pads cannot be skipped
            let travel = next.ball.velocity.length() * dt;
            let substeps = ((travel / (self.config.ball_radius * 0.5)).ceil() as u32).max(1);
            let sub_dt = dt / f64::from(substeps);

            for _ in 0..substeps {
                next.ball.shape.center = next.ball.shape.center + next.ball.velocity * sub_dt;

                if let Some(event) = self.resolve_collision(&mut next) {
                    events.push(event);
                }

                if let Some(scorer) = self.goal_scorer(&next) {
                    next.score.add_point(scorer);
                    events.push(PhysicsEvent::Goal { scorer });
                    if next.score.is_finished() {
                        next.stop_ball(&self.config);
                    } else {
                        next.serve(scorer.opponent(), &self.config);
                    }
                    break;
                }
            }
        }

        next.tick_count += 1;
        TickOutcome {
            world: next,
            events,
        }
    }

    fn move_pad(&self, pad: &mut Pad, dt: f64) {
        if pad.direction == 0.0 {
            return;
        }
        let half = self.config.pad_height / 2.0;
        let center = pad.center();
        let target_y = (center.y + pad.direction * self.config.pad_speed * dt)
            .clamp(half, self.config.field_height - half);
        pad.hitbox = pad.hitbox.translated(Vector2::new(0.0, target_y - center.y));
    }

    /// Test the ball against `[pad1, pad2, top, bottom]`; the first approaching hit wins
    fn resolve_collision(&self, world: &mut World) -> Option<PhysicsEvent> {
        let ball = Shape::Circle(world.ball.shape);
        let obstacles = [
            (Some(Side::Left), Shape::Segment(world.pads[0].hitbox)),
            (Some(Side::Right), Shape::Segment(world.pads[1].hitbox)),
            (None, Shape::Segment(self.config.top_wall())),
            (None, Shape::Segment(self.config.bottom_wall())),
        ];

        for (owner, obstacle) in obstacles {
            let Some(hit) = ball.intersect(&obstacle) else {
                continue;
            };
            if world.ball.velocity.dot(hit.normal) >= 0.0 {
                continue;
            }

            world.ball.shape.center = hit.hit_point + hit.normal * self.config.ball_radius;
            let reflected = world.ball.velocity.reflect(hit.normal);

            return Some(match owner {
                None => {
                    world.ball.velocity = reflected;
                    PhysicsEvent::WallBounce
                }
                Some(side) => {
                    let factor = (world.speed_factor * self.config.paddle_speed_up)
                        .min(self.config.max_speed_factor);
                    world.speed_factor = factor;
                    let speed = self.config.ball_speed * factor;
                    world.ball.velocity = if hit.normal.x.abs() > 0.5 {
                        self.aim_from_pad(world.pads[side.index()].hitbox, hit.hit_point, side) * speed
                    } else {
                        reflected.normalize() * speed
                    };
                    PhysicsEvent::PadBounce {
                        side,
                        speed_factor: factor,
                    }
                }
            });
        }
        None
    }

    /// Outgoing direction from a pad face, steeper the further from its centre
    fn aim_from_pad(&self, face: Segment, hit_point: Vector2, side: Side) -> Vector2 {
        let half = face.length() / 2.0;
        let offset = ((hit_point.y - face.midpoint().y) / half).clamp(-1.0, 1.0);
        let angle = offset * self.config.pad_bounce_angle / 2.0;
        let dir_x = match side {
            Side::Left => 1.0,
            Side::Right => -1.0,
        };
        Vector2::new(dir_x * angle.cos(), angle.sin())
    }

    fn goal_scorer(&self, world: &World) -> Option<Side> {
        let x = world.ball.shape.center.x;
        if x < 0.0 {
            Some(Side::Right)
        } else if x > self.config.field_width {
            Some(Side::Left)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Vector2;

    fn engine() -> PhysicsEngine {
        PhysicsEngine::new(PhysicsConfig::default())
    }

    fn world_with_ball(center: Vector2, velocity: Vector2) -> World {
        let mut world = World::new(1, 5, engine().config());
        world.ball.shape.center = center;
        world.ball.velocity = velocity;
        world
    }

    #[test]
    fn tick_is_deterministic_and_counts() {
        let engine = engine();
        let world = World::new(99, 5, engine.config());
        let a = engine.play_tick(&world);
        let b = engine.play_tick(&world);
        assert_eq!(a, b);
        assert_eq!(a.world.tick_count, 1);
        assert_eq!(engine.play_tick(&a.world).world.tick_count, 2);
    }

    #[test]
    fn free_flight_integrates_velocity() {
        let engine = engine();
        let world = world_with_ball(Vector2::new(0.65, 0.5), Vector2::new(1.0, 0.0));
        let out = engine.play_tick(&world);
        assert!(out.events.is_empty());
        assert!((out.world.ball.position().x - (0.65 + tick_delta())).abs() < 1e-9);
    }

    #[test]
    fn top_wall_reflects() {
        let engine = engine();
        let world = world_with_ball(Vector2::new(0.65, 0.009), Vector2::new(0.5, -1.0));
        let out = engine.play_tick(&world);
        assert_eq!(out.events, vec![PhysicsEvent::WallBounce]);
        assert!(out.world.ball.velocity.y > 0.0);
        assert!((out.world.ball.velocity.x - 0.5).abs() < 1e-12);
    }

    #[test]
    fn pad_hit_speeds_up_and_returns_ball() {
        let engine = engine();
        let world = world_with_ball(Vector2::new(0.03, 0.5), Vector2::new(-1.15, 0.0));
        let out = engine.play_tick(&world);
        assert_eq!(
            out.events,
            vec![PhysicsEvent::PadBounce {
                side: Side::Left,
                speed_factor: 1.05
            }]
        );
        assert!(out.world.ball.velocity.x > 0.0);
        assert!((out.world.ball.velocity.length() - 1.15 * 1.05).abs() < 1e-9);
        assert!((out.world.speed_factor - 1.05).abs() < 1e-12);
    }

    #[test]
    fn speed_factor_is_capped() {
        let engine = engine();
        let mut world = world_with_ball(Vector2::new(0.03, 0.5), Vector2::new(-1.15, 0.0));
        world.speed_factor = 2.49;
        let out = engine.play_tick(&world);
        assert_eq!(out.world.speed_factor, engine.config().max_speed_factor);
    }

    #[test]
    fn pad_wins_tie_with_wall() {
        let engine = engine();
        let mut world = world_with_ball(Vector2::new(0.02, 0.005), Vector2::new(-0.01, -0.01));
        let half = PAD_HEIGHT / 2.0;
        let pad = &mut world.pads[0];
        pad.hitbox = pad.hitbox.translated(Vector2::new(0.0, half - pad.center().y));
        let out = engine.play_tick(&world);
        assert!(matches!(
            out.events.first(),
            Some(PhysicsEvent::PadBounce {
                side: Side::Left,
                ..
            })
        ));
        assert!(!out.events.contains(&PhysicsEvent::WallBounce));
    }

    #[test]
    fn ball_past_left_line_scores_for_right() {
        let engine = engine();
        let world = world_with_ball(Vector2::new(0.001, 0.9), Vector2::new(-1.15, 0.0));
        let out = engine.play_tick(&world);
        assert_eq!(out.events, vec![PhysicsEvent::Goal { scorer: Side::Right }]);
        assert_eq!(out.world.score.p2, 1);
        assert_eq!(out.world.score.p1, 0);
        assert_eq!(out.world.ball.position(), engine.config().field_center());
        assert!(out.world.ball.velocity.x < 0.0, "serve heads to the conceding side");
        assert_eq!(out.world.speed_factor, 1.0);
    }

    #[test]
    fn final_point_stops_ball() {
        let engine = engine();
        let mut world = world_with_ball(Vector2::new(1.299, 0.1), Vector2::new(1.15, 0.0));
        world.score.p1 = 4;
        let out = engine.play_tick(&world);
        assert_eq!(out.world.score.winner(), Some(Side::Left));
        assert_eq!(out.world.ball.velocity, Vector2::ZERO);

        let after = engine.play_tick(&out.world);
        assert!(after.events.is_empty());
        assert_eq!(after.world.score, out.world.score);
    }

    #[test]
    fn pads_move_and_stay_in_field() {
        let engine = engine();
        let mut world = World::new(3, 5, engine.config());
        world.pads[1].set_direction(-1.0);
        let mut current = world;
        for _ in 0..200 {
            current = engine.play_tick(&current).world;
        }
        let top = current.pads[1].hitbox.a.y.min(current.pads[1].hitbox.b.y);
        assert!(top.abs() < 1e-9);
        assert_eq!(current.pads[0], world.pads[0]);
    }

    #[test]
    fn fast_ball_does_not_tunnel_through_pad() {
        let engine = engine();
        let mut world = world_with_ball(Vector2::new(0.05, 0.5), Vector2::new(-2.875, 0.0));
        world.speed_factor = 2.5;
        let mut bounced = false;
        for _ in 0..5 {
            let out = engine.play_tick(&world);
            bounced |= out
                .events
                .iter()
                .any(|e| matches!(e, PhysicsEvent::PadBounce { .. }));
            world = out.world;
        }
        assert!(bounced);
        assert_eq!(world.score.p2, 0);
    }
}
