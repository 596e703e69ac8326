//! Four-player single-elimination bracket.
//!
//! Pure bookkeeping: the registry owns the sessions and applies the
//! membership changes returned here.

use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use crate::game::UserId;

pub const TOURNAMENT_SIZE: usize = 4;

pub const SEMIFINAL_1: usize = 0;
pub const SEMIFINAL_2: usize = 1;
pub const FINAL: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    Pending,
    Ongoing,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Ongoing,
    Completed,
}

/// One node of the bracket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchTournament {
    pub id: Uuid,
    pub round: u8,
    pub match_number: u8,
    pub previous_match_id1: Option<Uuid>,
    pub previous_match_id2: Option<Uuid>,
    pub player1_id: Option<UserId>,
    pub player2_id: Option<UserId>,
    pub status: MatchStatus,
    pub score_p1: Option<u8>,
    pub score_p2: Option<u8>,
    pub winner: Option<UserId>,
    /// Session currently (or last) playing this match
    pub session_code: Option<String>,
    /// Player who left before this match was decided
    pub withdrawn: Option<UserId>,
    /// Decided without being played
    pub walkover: bool,
}

impl MatchTournament {
    fn new(round: u8, match_number: u8, previous: Option<(Uuid, Uuid)>) -> Self {
        Self {
            id: Uuid::new_v4(),
            round,
            match_number,
            previous_match_id1: previous.map(|(a, _)| a),
            previous_match_id2: previous.map(|(_, b)| b),
            player1_id: None,
            player2_id: None,
            status: MatchStatus::Pending,
            score_p1: None,
            score_p2: None,
            winner: None,
            session_code: None,
            withdrawn: None,
            walkover: false,
        }
    }

    pub fn has_player(&self, user_id: UserId) -> bool {
        self.player1_id == Some(user_id) || self.player2_id == Some(user_id)
    }

    pub fn opponent_of(&self, user_id: UserId) -> Option<UserId> {
        if self.player1_id == Some(user_id) {
            self.player2_id
        } else if self.player2_id == Some(user_id) {
            self.player1_id
        } else {
            None
        }
    }

    /// Both players known and nothing running yet
    pub fn is_ready(&self) -> bool {
        self.status == MatchStatus::Pending
            && self.player1_id.is_some()
            && self.player2_id.is_some()
            && self.session_code.is_none()
            && self.withdrawn.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BracketError {
    #[error("tournament is full")]
    Full,
    #[error("tournament is over")]
    Completed,
    #[error("already entered this tournament")]
    AlreadyEntered,
}

/// Membership changes caused by a bracket update
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Advance {
    /// Users whose tournament membership ends
    pub released: Vec<UserId>,
    /// The tournament just completed
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Withdrawal {
    /// Nothing left to play for this user
    NotActive,
    /// Slot freed (or walkover applied) right away
    Left(Advance),
    /// The user's match has a session; the leave goes through it
    InSession { session_code: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Tournament {
    pub code: String,
    pub status: TournamentStatus,
    pub participants: [Option<UserId>; TOURNAMENT_SIZE],
    pub matches: [MatchTournament; 3],
    #[serde(skip)]
    pub completed_at: Option<Instant>,
}

impl Tournament {
    pub fn new(code: String, creator: UserId) -> Self {
        let semi1 = MatchTournament::new(1, 1, None);
        let semi2 = MatchTournament::new(1, 2, None);
        let last = MatchTournament::new(2, 1, Some((semi1.id, semi2.id)));

        let mut tournament = Self {
            code,
            status: TournamentStatus::Pending,
            participants: [None; TOURNAMENT_SIZE],
            matches: [semi1, semi2, last],
            completed_at: None,
        };
        tournament.seat(0, Some(creator));
        tournament
    }

    /// Take the first free participant slot whose semifinal is still open
    pub fn join(&mut self, user_id: UserId) -> Result<usize, BracketError> {
        if self.status == TournamentStatus::Completed {
            return Err(BracketError::Completed);
        }
        if self.participants.contains(&Some(user_id)) {
            return Err(BracketError::AlreadyEntered);
        }

        let slot = (0..TOURNAMENT_SIZE)
            .find(|&i| self.participants[i].is_none() && self.matches[i / 2].status == MatchStatus::Pending)
            .ok_or(BracketError::Full)?;
        self.seat(slot, Some(user_id));
        Ok(slot)
    }

    pub fn is_empty(&self) -> bool {
        self.participants.iter().all(Option::is_none)
    }

    /// Matches that need a session now
    pub fn ready_matches(&self) -> Vec<usize> {
        (0..self.matches.len())
            .filter(|&i| self.matches[i].is_ready())
            .collect()
    }

    pub fn match_started(&mut self, index: usize, session_code: String) {
        let m = &mut self.matches[index];
        m.status = MatchStatus::Ongoing;
        m.session_code = Some(session_code);
        if self.status == TournamentStatus::Pending {
            self.status = TournamentStatus::Ongoing;
        }
    }

    /// Record a played (or forfeited) match and move the winner up
    pub fn match_completed(&mut self, index: usize, winner: UserId, score: (u8, u8)) -> Advance {
        let mut advance = Advance::default();
        let m = &mut self.matches[index];
        m.status = MatchStatus::Completed;
        m.score_p1 = Some(score.0);
        m.score_p2 = Some(score.1);
        m.winner = Some(winner);
        advance.released.extend(m.opponent_of(winner));
        if let Some(withdrawn) = m.withdrawn.take() {
            if withdrawn != winner && !advance.released.contains(&withdrawn) {
                advance.released.push(withdrawn);
            }
        }

        match index {
            FINAL => {
                advance.released.push(winner);
                self.finish(&mut advance);
            }
            SEMIFINAL_1 => {
                self.matches[FINAL].player1_id = Some(winner);
                self.try_walkover(&mut advance);
            }
            _ => {
                self.matches[FINAL].player2_id = Some(winner);
                self.try_walkover(&mut advance);
            }
        }
        advance
    }

    /// Award a match to the only player who showed up for it
    pub fn match_walkover(&mut self, index: usize, winner: UserId) -> Advance {
        let advance = self.match_completed(index, winner, (0, 0));
        let m = &mut self.matches[index];
        m.score_p1 = None;
        m.score_p2 = None;
        m.walkover = true;
        advance
    }

    /// A match's session ended without a result
    pub fn match_cancelled(&mut self, index: usize) -> Advance {
        let mut advance = Advance::default();
        let m = &mut self.matches[index];
        m.status = MatchStatus::Pending;
        m.session_code = None;

        if let Some(withdrawn) = m.withdrawn {
            advance.released.push(withdrawn);
            if index == FINAL {
                self.try_walkover(&mut advance);
            } else {
                self.matches[index].withdrawn = None;
                self.unseat(withdrawn);
            }
        }
        advance
    }

    /// Handle a voluntary leave
    pub fn withdraw(&mut self, user_id: UserId) -> Withdrawal {
        if self.status == TournamentStatus::Completed {
            return Withdrawal::NotActive;
        }
        let Some(index) = self.current_match(user_id) else {
            return Withdrawal::NotActive;
        };

        let m = &mut self.matches[index];
        if m.status == MatchStatus::Ongoing {
            if let Some(session_code) = m.session_code.clone() {
                m.withdrawn = Some(user_id);
                return Withdrawal::InSession { session_code };
            }
        }

        let mut advance = Advance {
            released: vec![user_id],
            completed: false,
        };
        if index == FINAL {
            m.withdrawn = Some(user_id);
            self.try_walkover(&mut advance);
        } else {
            self.unseat(user_id);
        }
        Withdrawal::Left(advance)
    }

    /// The undecided match `user_id` is (or will be) playing
    fn current_match(&self, user_id: UserId) -> Option<usize> {
        [FINAL, SEMIFINAL_1, SEMIFINAL_2]
            .into_iter()
            .find(|&i| self.matches[i].status != MatchStatus::Completed && self.matches[i].has_player(user_id))
    }

    /// Complete the final by walkover once the remaining finalist is known
    fn try_walkover(&mut self, advance: &mut Advance) {
        let last = &mut self.matches[FINAL];
        let Some(withdrawn) = last.withdrawn else {
            return;
        };
        if last.status == MatchStatus::Completed || last.player1_id.is_none() || last.player2_id.is_none() {
            return;
        }
        let Some(winner) = last.opponent_of(withdrawn) else {
            return;
        };

        last.status = MatchStatus::Completed;
        last.winner = Some(winner);
        last.walkover = true;
        last.session_code = None;
        advance.released.push(winner);
        self.finish(advance);
    }

    fn finish(&mut self, advance: &mut Advance) {
        self.status = TournamentStatus::Completed;
        self.completed_at = Some(Instant::now());
        advance.completed = true;
    }

    fn seat(&mut self, slot: usize, user_id: Option<UserId>) {
        self.participants[slot] = user_id;
        let m = &mut self.matches[slot / 2];
        if slot % 2 == 0 {
            m.player1_id = user_id;
        } else {
            m.player2_id = user_id;
        }
    }

    fn unseat(&mut self, user_id: UserId) {
        if let Some(slot) = self.participants.iter().position(|p| *p == Some(user_id)) {
            self.seat(slot, None);
        }
    }
}
