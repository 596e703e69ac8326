//! Session registry, invite codes and the matchmaker service

pub mod codes;
pub mod registry;
pub mod service;

pub use service::{Matchmaker, MatchmakerStats};

/// Why a registry operation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MatchmakingError {
    #[error("no game or tournament with that code")]
    NotFound,

    #[error("already in another game or tournament")]
    Conflict,

    #[error("not allowed to join")]
    Forbidden,
}
