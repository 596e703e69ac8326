//! Tournament brackets

pub mod bracket;

pub use bracket::{BracketError, Tournament, TournamentStatus, Withdrawal};
