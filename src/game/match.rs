//! Match session: one two-player game and its authoritative tick loop.
//!
//! Each session runs as its own task. Commands from the registry and the
//! players' sockets arrive on one queue and are applied in order, interleaved
//! with the session's timers and ticks inside a single `select!` loop.

use std::future::pending;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::geometry::Vector2;
use crate::util::time::{match_time, tick_duration};
use crate::wire::{ClientMessage, ServerMessage};
use crate::ws::connection::ConnectionHandle;
use crate::ws::protocol::{EndReason, ServerNotice};

use super::physics::PhysicsEngine;
use super::sync::{self, SyncScheduler};
use super::world::{Score, World};
use super::{Side, UserId};

/// Command queue depth per session
const COMMAND_CAPACITY: usize = 256;

/// Distance a reported ball may drift from the server's before correction
const POSITION_TOLERANCE: f64 = 0.1;

/// Velocity drift tolerated, relative to the server's ball speed
const VELOCITY_TOLERANCE: f64 = 0.05;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Created, waiting for a second player
    Waiting,
    /// Both players assigned, waiting for presence and the countdown
    Pending,
    /// Ticking
    Active,
    Ended,
}

#[derive(Debug)]
pub enum SessionCommand {
    /// A participant's socket is ready to receive frames
    Attach(ConnectionHandle),
    /// A participant's socket went away
    Detach { user_id: UserId, connection_id: Uuid },
    /// Second player assigned by the registry
    PlayerJoined {
        user_id: UserId,
        connection: Option<ConnectionHandle>,
    },
    Input { user_id: UserId, message: ClientMessage },
    /// Voluntary leave
    Leave { user_id: UserId },
}

/// How a session concluded
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    /// Played to the end or forfeited; this is what gets persisted
    Completed {
        score: Score,
        winner: UserId,
        reason: EndReason,
    },
    /// Torn down before a result existed
    Discarded { reason: EndReason },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub code: String,
    pub player1: UserId,
    pub player2: Option<UserId>,
    pub result: MatchResult,
    /// Players still connected when the session ended
    pub present: Vec<UserId>,
}

impl MatchOutcome {
    pub fn winner(&self) -> Option<UserId> {
        match self.result {
            MatchResult::Completed { winner, .. } => Some(winner),
            MatchResult::Discarded { .. } => None,
        }
    }
}

/// Handle to a running session, held by the registry
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub code: String,
    commands: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// Queue a command without waiting; dropped if the session is gone or saturated
    pub fn send(&self, command: SessionCommand) -> bool {
        match self.commands.try_send(command) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(code = %self.code, "Session command queue full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.commands.is_closed() || self.status() == SessionStatus::Ended
    }
}

#[derive(Debug)]
struct PlayerSlot {
    user_id: UserId,
    connection: Option<ConnectionHandle>,
}

impl PlayerSlot {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            connection: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    IdleEviction,
    Presence,
    /// Next countdown value to announce
    Countdown(u8),
}

/// The authoritative match
pub struct MatchSession {
    code: String,
    status: SessionStatus,
    player1: PlayerSlot,
    player2: Option<PlayerSlot>,
    world: World,
    engine: PhysicsEngine,
    config: GameConfig,
    commands: mpsc::Receiver<SessionCommand>,
    status_tx: watch::Sender<SessionStatus>,
    /// At most one pending timer; replacing it cancels the previous one
    deadline: Option<(Instant, Timer)>,
    ticker: Option<Interval>,
    sync: SyncScheduler,
    started_at: Instant,
    result: Option<MatchResult>,
}

impl MatchSession {
    /// Session opened by `player1`, waiting for an opponent
    pub fn new(code: String, player1: UserId, seed: u64, config: GameConfig) -> (Self, SessionHandle) {
        let (mut session, handle) = Self::build(code, player1, None, seed, config, SessionStatus::Waiting);
        session.arm(Timer::IdleEviction, session.config.waiting_timeout);
        (session, handle)
    }

    /// Session with both players already assigned (bracket matches)
    pub fn with_players(
        code: String,
        player1: UserId,
        player2: UserId,
        seed: u64,
        config: GameConfig,
    ) -> (Self, SessionHandle) {
        let (mut session, handle) = Self::build(
            code,
            player1,
            Some(PlayerSlot::new(player2)),
            seed,
            config,
            SessionStatus::Pending,
        );
        session.arm(Timer::Presence, session.config.presence_timeout);
        (session, handle)
    }

    fn build(
        code: String,
        player1: UserId,
        player2: Option<PlayerSlot>,
        seed: u64,
        config: GameConfig,
        status: SessionStatus,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (status_tx, status_rx) = watch::channel(status);

        let handle = SessionHandle {
            code: code.clone(),
            commands: commands_tx,
            status: status_rx,
        };

        let session = Self {
            world: World::new(seed, config.max_score, &config.physics),
            engine: PhysicsEngine::new(config.physics),
            sync: SyncScheduler::new(config.position_sync_interval),
            code,
            status,
            player1: PlayerSlot::new(player1),
            player2,
            config,
            commands,
            status_tx,
            deadline: None,
            ticker: None,
            started_at: Instant::now(),
            result: None,
        };

        (session, handle)
    }

    /// Run until the session ends, then report how it ended
    pub async fn run(mut self) -> MatchOutcome {
        info!(code = %self.code, player1 = %self.player1.user_id, "Session opened");

        while self.status != SessionStatus::Ended {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => self.discard(EndReason::Cancelled),
                },

                timer = deadline_reached(self.deadline) => {
                    self.deadline = None;
                    self.on_timer(timer);
                }

                _ = next_tick(&mut self.ticker) => self.on_tick(),
            }
        }

        let result = self
            .result
            .take()
            .unwrap_or(MatchResult::Discarded {
                reason: EndReason::Cancelled,
            });
        info!(code = %self.code, result = ?result, "Session closed");

        let present = std::iter::once(&self.player1)
            .chain(self.player2.as_ref())
            .filter(|slot| slot.connection.is_some())
            .map(|slot| slot.user_id)
            .collect();
        MatchOutcome {
            code: self.code,
            player1: self.player1.user_id,
            player2: self.player2.map(|p| p.user_id),
            result,
            present,
        }
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Attach(connection) => self.attach(connection),
            SessionCommand::Detach {
                user_id,
                connection_id,
            } => self.detach(user_id, connection_id),
            SessionCommand::PlayerJoined {
                user_id,
                connection,
            } => self.player_joined(user_id, connection),
            SessionCommand::Input { user_id, message } => self.handle_input(user_id, message),
            SessionCommand::Leave { user_id } => self.handle_leave(user_id),
        }
    }

    fn attach(&mut self, connection: ConnectionHandle) {
        let user_id = connection.user_id;
        let Some(side) = self.side_of(user_id) else {
            warn!(code = %self.code, user_id = %user_id, "Attach from non-participant");
            return;
        };

        connection.notify(ServerNotice::SessionJoined {
            code: self.code.clone(),
            side,
            opponent: self.user_at(side.opponent()),
        });
        if self.status == SessionStatus::Active {
            for frame in sync::full_state(&self.world, self.time()) {
                connection.send_message(&frame);
            }
        }
        if let Some(slot) = self.slot_mut(side) {
            slot.connection = Some(connection);
        }
        info!(code = %self.code, user_id = %user_id, side = ?side, "Player connected");

        if self.status == SessionStatus::Pending {
            self.check_presence();
        }
    }

    fn detach(&mut self, user_id: UserId, connection_id: Uuid) {
        let Some(side) = self.side_of(user_id) else {
            return;
        };
        let Some(slot) = self.slot_mut(side) else {
            return;
        };
        // A newer socket already replaced this one
        if slot.connection.as_ref().map(|c| c.id) != Some(connection_id) {
            debug!(user_id = %user_id, "Ignoring detach of stale connection");
            return;
        }
        slot.connection = None;
        info!(code = %self.code, user_id = %user_id, status = ?self.status, "Player disconnected");

        match self.status {
            SessionStatus::Pending => self.check_presence(),
            SessionStatus::Active => self.forfeit(side),
            SessionStatus::Waiting | SessionStatus::Ended => {}
        }
    }

    fn player_joined(&mut self, user_id: UserId, connection: Option<ConnectionHandle>) {
        if self.status != SessionStatus::Waiting || self.player2.is_some() || user_id == self.player1.user_id {
            warn!(code = %self.code, user_id = %user_id, "Unexpected join");
            return;
        }

        self.player2 = Some(PlayerSlot::new(user_id));
        self.deadline = None;
        self.set_status(SessionStatus::Pending);
        info!(code = %self.code, user_id = %user_id, "Second player joined");

        if let Some(host) = &self.player1.connection {
            host.notify(ServerNotice::SessionJoined {
                code: self.code.clone(),
                side: Side::Left,
                opponent: Some(user_id),
            });
        }

        match connection {
            Some(connection) => self.attach(connection),
            None => self.check_presence(),
        }
    }

    fn handle_input(&mut self, user_id: UserId, message: ClientMessage) {
        let Some(side) = self.side_of(user_id) else {
            return;
        };

        match message {
            ClientMessage::RequestScore => {
                let score = self.world.score;
                self.send_to(
                    side,
                    &ServerMessage::Score {
                        time: self.time(),
                        p1: score.p1,
                        p2: score.p2,
                    },
                );
            }
            _ if self.status != SessionStatus::Active => {}
            ClientMessage::Move { direction, .. } => {
                self.world.pad_mut(side).set_direction(direction.y);
                self.send_to(side, &ServerMessage::TickConfirmation);
            }
            ClientMessage::BallVelocity { velocity, .. } => self.reconcile_ball(side, Some(velocity), None),
            ClientMessage::BallPosition { position, .. } => self.reconcile_ball(side, None, Some(position)),
            ClientMessage::BallVelocityPosition {
                velocity, position, ..
            } => self.reconcile_ball(side, Some(velocity), Some(position)),
        }
    }

    /// Correct a client whose ball drifted from the server's
    fn reconcile_ball(&self, side: Side, velocity: Option<Vector2>, position: Option<Vector2>) {
        let ball = &self.world.ball;
        let position_off = position.is_some_and(|p| (p - ball.position()).length() > POSITION_TOLERANCE);
        let speed = ball.velocity.length().max(f64::EPSILON);
        let velocity_off =
            velocity.is_some_and(|v| (v - ball.velocity).length() > VELOCITY_TOLERANCE * speed);

        if position_off || velocity_off {
            debug!(code = %self.code, side = ?side, "Correcting client ball");
            let time = self.time();
            self.send_to(
                side,
                &ServerMessage::BallPos {
                    time,
                    position: ball.position(),
                },
            );
            self.send_to(side, &sync::ball_velocity(&self.world, time));
        }
    }

    fn handle_leave(&mut self, user_id: UserId) {
        let Some(side) = self.side_of(user_id) else {
            return;
        };
        info!(code = %self.code, user_id = %user_id, status = ?self.status, "Player left session");

        match self.status {
            SessionStatus::Waiting | SessionStatus::Pending => self.discard(EndReason::OpponentLeft),
            SessionStatus::Active => self.forfeit(side),
            SessionStatus::Ended => {}
        }
    }

    /// Start the countdown when both sockets are present, otherwise wait for the missing one
    fn check_presence(&mut self) {
        let both_connected = self.player1.connection.is_some()
            && self.player2.as_ref().is_some_and(|p| p.connection.is_some());

        match self.deadline {
            Some((_, Timer::Countdown(_))) if both_connected => {}
            _ if both_connected => {
                info!(code = %self.code, "Both players present, starting countdown");
                self.countdown_step(self.config.countdown_secs);
            }
            Some((_, Timer::Presence)) => {}
            _ => {
                if matches!(self.deadline, Some((_, Timer::Countdown(_)))) {
                    info!(code = %self.code, "Countdown cancelled");
                }
                self.arm(Timer::Presence, self.config.presence_timeout);
            }
        }
    }

    fn countdown_step(&mut self, seconds: u8) {
        if seconds == 0 {
            self.start_match();
            return;
        }
        self.broadcast(&ServerMessage::Countdown { seconds });
        self.notify_all(ServerNotice::StartingIn { seconds });
        self.arm(Timer::Countdown(seconds - 1), Duration::from_secs(1));
    }

    fn start_match(&mut self) {
        self.deadline = None;
        self.started_at = Instant::now();
        self.set_status(SessionStatus::Active);

        self.broadcast(&ServerMessage::Countdown { seconds: 0 });
        self.notify_all(ServerNotice::MatchStarted {
            code: self.code.clone(),
        });
        for frame in sync::full_state(&self.world, 0.0) {
            self.broadcast(&frame);
        }

        let mut ticker = interval(tick_duration());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);

        info!(
            code = %self.code,
            player1 = %self.player1.user_id,
            player2 = ?self.player2.as_ref().map(|p| p.user_id),
            "Match started"
        );
    }

    fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::IdleEviction => {
                info!(code = %self.code, "No opponent joined in time");
                self.discard(EndReason::Timeout);
            }
            Timer::Presence => {
                info!(code = %self.code, "Player did not connect in time");
                self.discard(EndReason::Timeout);
            }
            Timer::Countdown(seconds) => self.countdown_step(seconds),
        }
    }

    fn on_tick(&mut self) {
        if self.status != SessionStatus::Active {
            return;
        }

        let outcome = self.engine.play_tick(&self.world);
        self.world = outcome.world;

        let time = self.time();
        for frame in self.sync.frames_for(&outcome, time) {
            self.broadcast(&frame);
        }

        if let Some(side) = self.world.score.winner() {
            info!(code = %self.code, side = ?side, tick = self.world.tick_count, "Winning score reached");
            self.complete(side, EndReason::Score);
        }
    }

    fn forfeit(&mut self, loser: Side) {
        info!(code = %self.code, side = ?loser, "Player forfeited");
        self.complete(loser.opponent(), EndReason::Forfeit);
    }

    fn complete(&mut self, winner_side: Side, reason: EndReason) {
        let Some(winner) = self.user_at(winner_side) else {
            self.discard(EndReason::Cancelled);
            return;
        };
        let score = self.world.score;
        self.notify_all(ServerNotice::EndOfGame {
            reason,
            winner: Some(winner),
            score1: score.p1,
            score2: score.p2,
        });
        self.finish(MatchResult::Completed {
            score,
            winner,
            reason,
        });
    }

    fn discard(&mut self, reason: EndReason) {
        let score = self.world.score;
        self.notify_all(ServerNotice::EndOfGame {
            reason,
            winner: None,
            score1: score.p1,
            score2: score.p2,
        });
        self.finish(MatchResult::Discarded { reason });
    }

    fn finish(&mut self, result: MatchResult) {
        self.deadline = None;
        self.ticker = None;
        self.result = Some(result);
        self.set_status(SessionStatus::Ended);
    }

    fn arm(&mut self, timer: Timer, after: Duration) {
        self.deadline = Some((Instant::now() + after, timer));
    }

    fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.status_tx.send_replace(status);
    }

    /// Milliseconds since the match started
    fn time(&self) -> f64 {
        match self.status {
            SessionStatus::Active | SessionStatus::Ended => match_time(self.started_at),
            SessionStatus::Waiting | SessionStatus::Pending => 0.0,
        }
    }

    fn side_of(&self, user_id: UserId) -> Option<Side> {
        if self.player1.user_id == user_id {
            Some(Side::Left)
        } else if self.player2.as_ref().is_some_and(|p| p.user_id == user_id) {
            Some(Side::Right)
        } else {
            None
        }
    }

    fn user_at(&self, side: Side) -> Option<UserId> {
        match side {
            Side::Left => Some(self.player1.user_id),
            Side::Right => self.player2.as_ref().map(|p| p.user_id),
        }
    }

    fn slot_mut(&mut self, side: Side) -> Option<&mut PlayerSlot> {
        match side {
            Side::Left => Some(&mut self.player1),
            Side::Right => self.player2.as_mut(),
        }
    }

    fn connections(&self) -> impl Iterator<Item = &ConnectionHandle> {
        std::iter::once(&self.player1)
            .chain(self.player2.as_ref())
            .filter_map(|slot| slot.connection.as_ref())
    }

    fn send_to(&self, side: Side, msg: &ServerMessage) {
        let slot = match side {
            Side::Left => Some(&self.player1),
            Side::Right => self.player2.as_ref(),
        };
        if let Some(connection) = slot.and_then(|s| s.connection.as_ref()) {
            connection.send_message(msg);
        }
    }

    /// Encode once, send to every connected player
    fn broadcast(&self, msg: &ServerMessage) {
        match msg.encode() {
            Ok(frame) => {
                for connection in self.connections() {
                    connection.send_bytes(frame.clone());
                }
            }
            Err(e) => warn!(code = %self.code, error = %e, "Failed to encode broadcast"),
        }
    }

    fn notify_all(&self, notice: ServerNotice) {
        for connection in self.connections() {
            connection.notify(notice.clone());
        }
    }
}

async fn deadline_reached(deadline: Option<(Instant, Timer)>) -> Timer {
    match deadline {
        Some((at, timer)) => {
            sleep_until(at).await;
            timer
        }
        None => pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}
