//! Session and tournament bookkeeping.
//!
//! Every method here runs under the matchmaker's lock and never awaits. Work
//! that must happen outside the lock (spawning sessions, sending commands,
//! persisting results) is handed back to the caller.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::GameConfig;
use crate::game::{MatchOutcome, MatchResult, MatchSession, SessionHandle, UserId};
use crate::store::MatchRecord;
use crate::tournament::{BracketError, Tournament, TournamentStatus, Withdrawal};
use crate::ws::protocol::EndReason;

use super::codes::unique_code;
use super::MatchmakingError;

/// How long finished tournaments stay viewable
const TOURNAMENT_RETENTION: Duration = Duration::from_secs(3600);

/// What keeps a user busy; a user has at most one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    Session(String),
    Tournament(String),
}

/// Bracket position of a tournament-bound session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketLink {
    pub tournament: String,
    pub index: usize,
}

pub struct SessionEntry {
    pub handle: SessionHandle,
    pub player1: UserId,
    pub player2: Option<UserId>,
    pub bracket: Option<BracketLink>,
    /// Flips to `true` once the registry released this session
    pub done: watch::Receiver<bool>,
}

impl SessionEntry {
    fn players(&self) -> impl Iterator<Item = UserId> {
        std::iter::once(self.player1).chain(self.player2)
    }
}

/// A session registered but not yet running; spawn it once the lock is gone
pub struct NewSession {
    pub session: MatchSession,
    pub handle: SessionHandle,
    pub done: watch::Sender<bool>,
    pub players: Vec<UserId>,
}

pub enum JoinResult {
    Joined(SessionHandle),
    /// Already a participant; nothing changed
    AlreadyJoined,
}

/// Session to wait on before a leave is complete
pub type Pending = (SessionHandle, watch::Receiver<bool>);

#[derive(Default)]
pub struct Conclusion {
    pub record: Option<MatchRecord>,
    pub spawn: Vec<NewSession>,
}

pub struct Registry {
    sessions: HashMap<String, SessionEntry>,
    user_sessions: HashMap<UserId, String>,
    /// Key set is the busy set
    busy: HashMap<UserId, Membership>,
    tournaments: HashMap<String, Tournament>,
    config: GameConfig,
}

impl Registry {
    pub fn new(config: GameConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            user_sessions: HashMap::new(),
            busy: HashMap::new(),
            tournaments: HashMap::new(),
            config,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn tournament_count(&self) -> usize {
        self.tournaments.len()
    }

    pub fn membership(&self, user_id: UserId) -> Option<&Membership> {
        self.busy.get(&user_id)
    }

    pub fn is_busy(&self, user_id: UserId) -> bool {
        self.busy.contains_key(&user_id)
    }

    fn code_taken(&self, code: &str) -> bool {
        self.sessions.contains_key(code) || self.tournaments.contains_key(code)
    }

    fn new_code(&self) -> String {
        unique_code(&mut rand::thread_rng(), |c| self.code_taken(c))
    }

    fn open_session(&mut self, player1: UserId, player2: Option<UserId>, bracket: Option<BracketLink>) -> NewSession {
        let code = self.new_code();
        let seed = rand::random::<u64>();
        let (session, handle) = match player2 {
            Some(player2) => MatchSession::with_players(code.clone(), player1, player2, seed, self.config.clone()),
            None => MatchSession::new(code.clone(), player1, seed, self.config.clone()),
        };
        let (done_tx, done_rx) = watch::channel(false);

        let players: Vec<UserId> = std::iter::once(player1).chain(player2).collect();
        for &user_id in &players {
            self.user_sessions.insert(user_id, code.clone());
        }
        self.sessions.insert(
            code.clone(),
            SessionEntry {
                handle: handle.clone(),
                player1,
                player2,
                bracket,
                done: done_rx,
            },
        );
        debug!(code = %code, ?players, "Session registered");

        NewSession {
            session,
            handle,
            done: done_tx,
            players,
        }
    }

    pub fn create_session(&mut self, user_id: UserId) -> Result<NewSession, MatchmakingError> {
        if self.is_busy(user_id) {
            return Err(MatchmakingError::Conflict);
        }
        let new = self.open_session(user_id, None, None);
        self.busy.insert(user_id, Membership::Session(new.handle.code.clone()));
        Ok(new)
    }

    pub fn join_session(&mut self, code: &str, user_id: UserId) -> Result<JoinResult, MatchmakingError> {
        let entry = self
            .sessions
            .get_mut(code)
            .filter(|e| !e.handle.is_finished())
            .ok_or(MatchmakingError::NotFound)?;

        if entry.player1 == user_id || entry.player2 == Some(user_id) {
            return Ok(JoinResult::AlreadyJoined);
        }
        if self.busy.contains_key(&user_id) {
            return Err(MatchmakingError::Conflict);
        }
        if entry.bracket.is_some() || entry.player2.is_some() {
            return Err(MatchmakingError::Forbidden);
        }

        entry.player2 = Some(user_id);
        let handle = entry.handle.clone();
        self.user_sessions.insert(user_id, code.to_string());
        self.busy.insert(user_id, Membership::Session(code.to_string()));
        Ok(JoinResult::Joined(handle))
    }

    /// Session the user is assigned to
    pub fn session_of(&self, user_id: UserId) -> Option<&SessionEntry> {
        self.user_sessions
            .get(&user_id)
            .and_then(|code| self.sessions.get(code))
    }

    pub fn handle_for(&self, user_id: UserId) -> Option<SessionHandle> {
        self.session_of(user_id).map(|e| e.handle.clone())
    }

    pub fn assigned_code(&self, user_id: UserId) -> Result<String, MatchmakingError> {
        self.user_sessions
            .get(&user_id)
            .cloned()
            .ok_or(MatchmakingError::NotFound)
    }

    /// Session a voluntary leave must go through, if any
    pub fn pending_leave(&self, user_id: UserId) -> Option<Pending> {
        self.session_of(user_id)
            .map(|e| (e.handle.clone(), e.done.clone()))
    }

    /// Release everything the finished session held and update its bracket
    pub fn conclude(&mut self, outcome: &MatchOutcome) -> Conclusion {
        let mut conclusion = Conclusion::default();
        let Some(entry) = self.sessions.remove(&outcome.code) else {
            return conclusion;
        };
        let code = &outcome.code;

        for user_id in entry.players() {
            if self.user_sessions.get(&user_id) == Some(code) {
                self.user_sessions.remove(&user_id);
            }
            if self.busy.get(&user_id) == Some(&Membership::Session(code.clone())) {
                self.busy.remove(&user_id);
            }
        }

        let Some(link) = entry.bracket else {
            if let (MatchResult::Completed { score, .. }, Some(player2)) = (&outcome.result, entry.player2) {
                conclusion.record = Some(MatchRecord {
                    player1_id: entry.player1,
                    player2_id: player2,
                    score1: score.p1,
                    score2: score.p2,
                    tournament_id: None,
                    round: None,
                    match_number: None,
                    ended_at: Utc::now(),
                });
            }
            return conclusion;
        };

        let Some(tournament) = self.tournaments.get_mut(&link.tournament) else {
            return conclusion;
        };
        let mut progressed = true;
        let advance = match &outcome.result {
            MatchResult::Completed { score, winner, .. } => {
                let node = &tournament.matches[link.index];
                conclusion.record = entry.player2.map(|player2| MatchRecord {
                    player1_id: entry.player1,
                    player2_id: player2,
                    score1: score.p1,
                    score2: score.p2,
                    tournament_id: Some(link.tournament.clone()),
                    round: Some(node.round),
                    match_number: Some(node.match_number),
                    ended_at: Utc::now(),
                });
                tournament.match_completed(link.index, *winner, (score.p1, score.p2))
            }
            // Only one player showed up before the presence deadline
            MatchResult::Discarded {
                reason: EndReason::Timeout,
            } if outcome.present.len() == 1 => {
                let winner = outcome.present[0];
                info!(tournament = %link.tournament, index = link.index, winner = %winner, "Bracket match won by walkover");
                tournament.match_walkover(link.index, winner)
            }
            MatchResult::Discarded { .. } => {
                progressed = false;
                tournament.match_cancelled(link.index)
            }
        };

        if advance.completed {
            info!(tournament = %link.tournament, "Tournament completed");
        }
        self.release(&advance.released, &link.tournament);

        // Cancelled bracket matches restart when a player reconnects, not here
        if progressed {
            conclusion.spawn = self.start_ready(&link.tournament);
        }
        conclusion
    }

    pub fn create_tournament(&mut self, user_id: UserId) -> Result<String, MatchmakingError> {
        if self.is_busy(user_id) {
            return Err(MatchmakingError::Conflict);
        }
        self.prune_tournaments();

        let code = self.new_code();
        self.tournaments.insert(code.clone(), Tournament::new(code.clone(), user_id));
        self.busy.insert(user_id, Membership::Tournament(code.clone()));
        info!(tournament = %code, user_id = %user_id, "Tournament created");
        Ok(code)
    }

    pub fn join_tournament(&mut self, code: &str, user_id: UserId) -> Result<Vec<NewSession>, MatchmakingError> {
        let tournament = self
            .tournaments
            .get_mut(code)
            .ok_or(MatchmakingError::NotFound)?;

        match self.busy.get(&user_id) {
            Some(Membership::Tournament(current)) if current == code => return Ok(Vec::new()),
            Some(_) => return Err(MatchmakingError::Conflict),
            None => {}
        }

        tournament.join(user_id).map_err(|e| match e {
            BracketError::Full | BracketError::Completed | BracketError::AlreadyEntered => {
                MatchmakingError::Forbidden
            }
        })?;
        self.busy.insert(user_id, Membership::Tournament(code.to_string()));
        info!(tournament = %code, user_id = %user_id, "Joined tournament");

        Ok(self.start_ready(code))
    }

    /// Leave the user's tournament; returns the session to wait on when the
    /// user's match is in progress
    pub fn leave_tournament(&mut self, user_id: UserId) -> Option<Pending> {
        let Some(Membership::Tournament(code)) = self.busy.get(&user_id).cloned() else {
            return None;
        };
        let Some(tournament) = self.tournaments.get_mut(&code) else {
            self.busy.remove(&user_id);
            return None;
        };

        match tournament.withdraw(user_id) {
            Withdrawal::NotActive => {
                self.busy.remove(&user_id);
                None
            }
            Withdrawal::Left(advance) => {
                let abandoned = tournament.is_empty() && tournament.status == TournamentStatus::Pending;
                self.release(&advance.released, &code);
                if abandoned {
                    self.tournaments.remove(&code);
                    info!(tournament = %code, "Empty tournament removed");
                }
                info!(tournament = %code, user_id = %user_id, "Left tournament");
                None
            }
            Withdrawal::InSession { session_code } => self
                .sessions
                .get(&session_code)
                .map(|e| (e.handle.clone(), e.done.clone())),
        }
    }

    pub fn tournament(&self, code: &str) -> Result<Tournament, MatchmakingError> {
        self.tournaments
            .get(code)
            .cloned()
            .ok_or(MatchmakingError::NotFound)
    }

    pub fn tournament_of(&self, user_id: UserId) -> Result<String, MatchmakingError> {
        match self.busy.get(&user_id) {
            Some(Membership::Tournament(code)) => Ok(code.clone()),
            _ => Err(MatchmakingError::NotFound),
        }
    }

    /// Restart stalled bracket matches for a tournament member with no session
    pub fn resume_tournament(&mut self, user_id: UserId) -> Vec<NewSession> {
        match self.busy.get(&user_id) {
            Some(Membership::Tournament(code)) if !self.user_sessions.contains_key(&user_id) => {
                let code = code.clone();
                self.start_ready(&code)
            }
            _ => Vec::new(),
        }
    }

    /// Open sessions for every bracket match whose players are known
    fn start_ready(&mut self, code: &str) -> Vec<NewSession> {
        let ready: Vec<(usize, UserId, UserId)> = match self.tournaments.get(code) {
            Some(t) => t
                .ready_matches()
                .into_iter()
                .filter_map(|i| Some((i, t.matches[i].player1_id?, t.matches[i].player2_id?)))
                .collect(),
            None => return Vec::new(),
        };

        let mut spawned = Vec::new();
        for (index, player1, player2) in ready {
            if self.user_sessions.contains_key(&player1) || self.user_sessions.contains_key(&player2) {
                continue;
            }
            let link = BracketLink {
                tournament: code.to_string(),
                index,
            };
            let new = self.open_session(player1, Some(player2), Some(link));
            if let Some(t) = self.tournaments.get_mut(code) {
                t.match_started(index, new.handle.code.clone());
            }
            info!(tournament = %code, index, session = %new.handle.code, "Bracket match opened");
            spawned.push(new);
        }
        spawned
    }

    fn release(&mut self, users: &[UserId], tournament: &str) {
        for user_id in users {
            if matches!(self.busy.get(user_id), Some(Membership::Tournament(code)) if code == tournament) {
                self.busy.remove(user_id);
            }
        }
    }

    fn prune_tournaments(&mut self) {
        self.tournaments.retain(|_, t| {
            t.completed_at
                .map_or(true, |at| at.elapsed() < TOURNAMENT_RETENTION)
        });
    }
}
