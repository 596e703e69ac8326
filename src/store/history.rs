//! Match history collaborator: the one write this server performs

#[cfg(test)]
use std::sync::Arc;

use chrono::{DateTime, Utc};
#[cfg(test)]
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::game::UserId;

/// Completed match as stored by the history service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub player1_id: UserId,
    pub player2_id: UserId,
    pub score1: u8,
    pub score2: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tournament_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_number: Option<u8>,
    pub ended_at: DateTime<Utc>,
}

/// Where finished matches go
#[derive(Clone)]
pub enum MatchHistory {
    /// POST to the history service
    Http(HttpHistory),
    /// No history service configured; results are only logged
    Log,
    /// Kept in memory for assertions
    #[cfg(test)]
    Memory(Arc<Mutex<Vec<MatchRecord>>>),
}

impl MatchHistory {
    pub fn from_config(config: &Config) -> Self {
        match &config.history_service_url {
            Some(url) => Self::Http(HttpHistory::new(url.clone(), config.internal_secret.clone())),
            None => {
                warn!("HISTORY_SERVICE_URL not set, match results will only be logged");
                Self::Log
            }
        }
    }

    #[cfg(test)]
    pub fn memory() -> (Self, Arc<Mutex<Vec<MatchRecord>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        (Self::Memory(records.clone()), records)
    }

    pub async fn record(&self, record: &MatchRecord) -> Result<(), HistoryError> {
        match self {
            Self::Http(client) => client.post_match(record).await,
            Self::Log => {
                info!(
                    player1 = %record.player1_id,
                    player2 = %record.player2_id,
                    score1 = record.score1,
                    score2 = record.score2,
                    tournament = ?record.tournament_id,
                    "Match finished"
                );
                Ok(())
            }
            #[cfg(test)]
            Self::Memory(records) => {
                records.lock().push(record.clone());
                Ok(())
            }
        }
    }
}

/// HTTP client for the history service
#[derive(Clone)]
pub struct HttpHistory {
    client: Client,
    base_url: String,
    internal_secret: String,
}

impl HttpHistory {
    pub fn new(base_url: String, internal_secret: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            internal_secret,
        }
    }

    async fn post_match(&self, record: &MatchRecord) -> Result<(), HistoryError> {
        let url = format!("{}/matches", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-internal-secret", &self.internal_secret)
            .json(record)
            .send()
            .await
            .map_err(HistoryError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(HistoryError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("History service error (status {status}): {body}")]
    Api { status: u16, body: String },
}
