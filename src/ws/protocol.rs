//! JSON lifecycle notices sent alongside the binary game-state frames.
//! Game state itself never travels as JSON; see `crate::wire`.

use serde::{Deserialize, Serialize};

use crate::game::{Side, UserId};

/// Why a match or session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// A player reached the winning score
    Score,
    /// A player disconnected or left mid-match
    Forfeit,
    /// A player left before the match started
    OpponentLeft,
    /// Nobody showed up in time
    Timeout,
    /// Server-side teardown
    Cancelled,
}

/// Notices sent from server to client as text frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerNotice {
    /// Sent once after a successful upgrade
    Welcome {
        user_id: UserId,
        login: String,
        server_time: u64,
    },

    /// Connection bound to a session
    SessionJoined {
        code: String,
        side: Side,
        opponent: Option<UserId>,
    },

    /// Countdown progress
    StartingIn { seconds: u8 },

    MatchStarted { code: String },

    EndOfGame {
        reason: EndReason,
        winner: Option<UserId>,
        score1: u8,
        score2: u8,
    },

    Error { code: String, message: String },
}

impl ServerNotice {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
