//! Outbound collaborators

pub mod history;

pub use history::{MatchHistory, MatchRecord};
