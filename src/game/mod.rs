//! Game simulation modules

pub mod r#match;
pub mod physics;
pub mod sync;
pub mod world;

pub use r#match::{MatchOutcome, MatchResult, MatchSession, SessionCommand, SessionHandle};

use serde::{Deserialize, Serialize};

/// Account id issued by the auth service
pub type UserId = u64;

/// Which end of the field a player defends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Player 1
    Left,
    /// Player 2
    Right,
}

impl Side {
    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    pub fn opponent(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}
