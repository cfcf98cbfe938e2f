//! Application configuration loaded from environment variables.
//!
//! Durations use the Go notation shared with the scheduling clients
//! (`2m`, `30s`, `100ms`).

use crate::time_utils::parse_go_duration;
use std::env;
use std::time::Duration;

/// Which storage backends the process wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Firestore documents for events, profiles, boards and the rating queue.
    Firestore,
    /// Process-local stores (local development and tests).
    Memory,
}

/// Settings for draining the rating update channel into weekly boards.
#[derive(Debug, Clone)]
pub struct LeaderboardConfig {
    /// Maximum envelopes read per batch
    pub batch_size: usize,
    /// How long a receive waits for the first envelope
    pub wait_window: Duration,
    /// How long a received envelope stays hidden from other consumers.
    /// Must cover the expected aggregation time, retries included.
    pub visibility_timeout: Duration,
    /// Read-merge-write attempts before a batch is given back to the queue
    pub max_attempts: u32,
    /// First backoff delay between conflicting board writes
    pub backoff_base: Duration,
    /// Deliveries after which an envelope is dropped as poison
    pub max_receives: u32,
    /// Key prefix of weekly board objects
    pub board_prefix: String,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            wait_window: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(30),
            max_attempts: 8,
            backoff_base: Duration::from_millis(100),
            max_receives: 5,
            board_prefix: String::new(),
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// GCP project ID
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    /// Storage backend selection
    pub storage_backend: StorageBackend,
    /// Secret shared with the authentication service for bearer tokens
    pub jwt_signing_key: Vec<u8>,
    /// Punctuality tolerance used by the rating algorithm
    pub rating_anchor: Duration,
    /// Deadline applied to every API call
    pub request_timeout: Duration,
    /// Leaderboard aggregation settings
    pub leaderboard: LeaderboardConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let storage_backend = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "firestore" => StorageBackend::Firestore,
            "memory" => StorageBackend::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    name: "STORAGE_BACKEND",
                    reason: format!("unknown backend '{}'", other),
                })
            }
        };

        let defaults = LeaderboardConfig::default();
        let leaderboard = LeaderboardConfig {
            batch_size: number_var("LEADERBOARD_BATCH_SIZE", defaults.batch_size)?,
            wait_window: duration_var("LEADERBOARD_WAIT_WINDOW", defaults.wait_window)?,
            visibility_timeout: duration_var(
                "LEADERBOARD_VISIBILITY_TIMEOUT",
                defaults.visibility_timeout,
            )?,
            max_attempts: number_var("LEADERBOARD_MAX_ATTEMPTS", defaults.max_attempts)?,
            backoff_base: duration_var("LEADERBOARD_BACKOFF_BASE", defaults.backoff_base)?,
            max_receives: number_var("QUEUE_MAX_RECEIVES", defaults.max_receives)?,
            board_prefix: env::var("LEADERBOARD_BOARD_PREFIX").unwrap_or(defaults.board_prefix),
        };
        if leaderboard.batch_size == 0 || leaderboard.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "LEADERBOARD_BATCH_SIZE",
                reason: "batch size and attempts must be positive".to_string(),
            });
        }

        let rating_anchor = duration_var("RATING_ANCHOR", Duration::from_secs(120))?;
        if rating_anchor.is_zero() {
            return Err(ConfigError::Invalid {
                name: "RATING_ANCHOR",
                reason: "anchor must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port: number_var("PORT", 8080)?,
            storage_backend,
            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .trim()
                .as_bytes()
                .to_vec(),
            rating_anchor,
            request_timeout: duration_var("REQUEST_TIMEOUT", Duration::from_secs(10))?,
            leaderboard,
        })
    }

    /// Config for tests: in-memory storage and short aggregation timings.
    pub fn test_default() -> Self {
        Self {
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            storage_backend: StorageBackend::Memory,
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            rating_anchor: Duration::from_secs(120),
            request_timeout: Duration::from_secs(5),
            leaderboard: LeaderboardConfig {
                batch_size: 10,
                wait_window: Duration::from_millis(50),
                visibility_timeout: Duration::from_millis(200),
                max_attempts: 5,
                backoff_base: Duration::from_millis(1),
                max_receives: 5,
                board_prefix: String::new(),
            },
        }
    }
}

fn duration_var(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(raw) => parse_go_duration(&raw).map_err(|reason| ConfigError::Invalid { name, reason }),
        Err(_) => Ok(default),
    }
}

fn number_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            reason: format!("'{}' is not a number", raw),
        }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
