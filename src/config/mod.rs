//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::physics::PhysicsConfig;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit logs as JSON lines
    pub log_json: bool,

    /// HS256 secret shared with the auth service for identity tokens
    pub jwt_secret: String,
    /// Shared secret for service-to-service calls (cleanup callback, history writes)
    pub internal_secret: String,

    /// Base URL of the match history service; results are only logged when unset
    pub history_service_url: Option<String>,
    /// Allowed client origin for CORS
    pub client_origin: String,

    /// Gameplay tunables
    pub game: GameConfig,
}

/// Match timing and scoring tunables
#[derive(Clone, Debug)]
pub struct GameConfig {
    /// Points needed to win a match
    pub max_score: u8,
    /// Countdown length once both players are present
    pub countdown_secs: u8,
    /// How long a session may wait for its second player
    pub waiting_timeout: Duration,
    /// How long a pending session waits for a dropped player to reconnect
    pub presence_timeout: Duration,
    /// Ticks between position/pad broadcasts while active
    pub position_sync_interval: u32,
    pub physics: PhysicsConfig,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            max_score: 5,
            countdown_secs: 5,
            waiting_timeout: Duration::from_secs(300),
            presence_timeout: Duration::from_secs(30),
            position_sync_interval: 5,
            physics: PhysicsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let defaults = GameConfig::default();
        let physics = PhysicsConfig {
            paddle_speed_up: parse_var("PADDLE_SPEED_UP", defaults.physics.paddle_speed_up)?,
            ..defaults.physics
        };
        let game = GameConfig {
            max_score: parse_var("MAX_SCORE", defaults.max_score)?,
            countdown_secs: parse_var("COUNTDOWN_SECS", defaults.countdown_secs)?,
            waiting_timeout: Duration::from_secs(parse_var(
                "WAITING_TIMEOUT_SECS",
                defaults.waiting_timeout.as_secs(),
            )?),
            presence_timeout: Duration::from_secs(parse_var(
                "PRESENCE_TIMEOUT_SECS",
                defaults.presence_timeout.as_secs(),
            )?),
            position_sync_interval: parse_var(
                "POSITION_SYNC_INTERVAL",
                defaults.position_sync_interval,
            )?
            .max(1),
            physics,
        };

        if game.max_score == 0 {
            return Err(ConfigError::Invalid("MAX_SCORE"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")),

            jwt_secret: env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?,
            internal_secret: env::var("INTERNAL_SECRET")
                .map_err(|_| ConfigError::Missing("INTERNAL_SECRET"))?,

            history_service_url: env::var("HISTORY_SERVICE_URL")
                .ok()
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            game,
        })
    }
}

#[cfg(test)]
impl Config {
    pub(crate) fn for_tests() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_level: "debug".to_string(),
            log_json: false,
            jwt_secret: "test-jwt-secret".to_string(),
            internal_secret: "test-internal-secret".to_string(),
            history_service_url: None,
            client_origin: "http://localhost:3000".to_string(),
            game: GameConfig::default(),
        }
    }
}

/// Parse an optional variable, falling back to `default` when unset
fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
