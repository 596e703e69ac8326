//! Decides which state frames go out after each tick

use crate::geometry::Segment;
use crate::wire::ServerMessage;

use super::physics::TickOutcome;
use super::world::World;

/// Schedules periodic position/pad broadcasts and builds event frames
pub struct SyncScheduler {
    /// Ticks since the last position sync
    ticks_since_sync: u32,
    /// Sync interval in ticks
    sync_interval: u32,
}

impl SyncScheduler {
    pub fn new(sync_interval: u32) -> Self {
        Self {
            ticks_since_sync: 0,
            sync_interval: sync_interval.max(1),
        }
    }

    /// Check if it's time to send positions
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_sync += 1;
        if self.ticks_since_sync >= self.sync_interval {
            self.ticks_since_sync = 0;
            true
        } else {
            false
        }
    }

    /// Force a position sync on the next check
    pub fn force_next(&mut self) {
        self.ticks_since_sync = self.sync_interval;
    }

    /// Frames to broadcast after a tick, in send order
    pub fn frames_for(&mut self, outcome: &TickOutcome, time: f64) -> Vec<ServerMessage> {
        let mut frames = Vec::new();
        let world = &outcome.world;

        if outcome.scored() {
            frames.push(ServerMessage::Score {
                time,
                p1: world.score.p1,
                p2: world.score.p2,
            });
            // Serve resets the ball; pads need a fresh sync too
            self.force_next();
        }
        if outcome.velocity_changed() {
            frames.push(ball_velocity(world, time));
        }
        if self.should_send() {
            frames.push(ServerMessage::BallPos {
                time,
                position: world.ball.position(),
            });
            frames.push(pad_segments(world));
        }
        frames
    }
}

/// Everything a client needs to draw the field from scratch
pub fn full_state(world: &World, time: f64) -> Vec<ServerMessage> {
    vec![
        ServerMessage::Score {
            time,
            p1: world.score.p1,
            p2: world.score.p2,
        },
        ball_velocity(world, time),
        ServerMessage::BallPos {
            time,
            position: world.ball.position(),
        },
        pad_segments(world),
    ]
}

pub fn ball_velocity(world: &World, time: f64) -> ServerMessage {
    ServerMessage::BallVeloChange {
        time,
        velocity: world.ball.velocity,
        speed_factor: world.speed_factor,
    }
}

pub fn pad_segments(world: &World) -> ServerMessage {
    let segments: Vec<Segment> = world.pads.iter().map(|p| p.hitbox).collect();
    ServerMessage::DynamicSegments { segments }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::{PhysicsConfig, PhysicsEvent};
    use crate::game::Side;

    fn quiet_outcome() -> TickOutcome {
        TickOutcome {
            world: World::new(1, 5, &PhysicsConfig::default()),
            events: Vec::new(),
        }
    }

    #[test]
    fn positions_every_interval() {
        let mut sync = SyncScheduler::new(5);
        let outcome = quiet_outcome();
        let counts: Vec<usize> = (0..10).map(|_| sync.frames_for(&outcome, 0.0).len()).collect();
        assert_eq!(counts, vec![0, 0, 0, 0, 2, 0, 0, 0, 0, 2]);
    }

    #[test]
    fn bounce_sends_velocity_immediately() {
        let mut sync = SyncScheduler::new(5);
        let mut outcome = quiet_outcome();
        outcome.events.push(PhysicsEvent::WallBounce);
        let frames = sync.frames_for(&outcome, 12.0);
        assert!(matches!(frames[..], [ServerMessage::BallVeloChange { time, .. }] if time == 12.0));
    }

    #[test]
    fn goal_sends_score_then_resyncs() {
        let mut sync = SyncScheduler::new(5);
        let mut outcome = quiet_outcome();
        outcome.world.score.add_point(Side::Left);
        outcome.events.push(PhysicsEvent::Goal { scorer: Side::Left });
        let frames = sync.frames_for(&outcome, 0.0);
        assert!(matches!(frames[0], ServerMessage::Score { p1: 1, p2: 0, .. }));
        assert!(matches!(frames[1], ServerMessage::BallVeloChange { .. }));
        assert!(matches!(frames[2], ServerMessage::BallPos { .. }));
        assert!(matches!(&frames[3], ServerMessage::DynamicSegments { segments } if segments.len() == 2));
    }
}
