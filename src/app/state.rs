//! Application state

use std::sync::Arc;

use crate::config::Config;
use crate::matchmaking::Matchmaker;
use crate::store::MatchHistory;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub matchmaker: Matchmaker,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let history = MatchHistory::from_config(&config);
        Self::with_history(config, history)
    }

    pub fn with_history(config: Config, history: MatchHistory) -> Self {
        let matchmaker = Matchmaker::new(config.game.clone(), history);
        Self {
            config: Arc::new(config),
            matchmaker,
        }
    }
}
