//! User profile with cumulative rating statistics.

use serde::{Deserialize, Serialize};

/// Profile record, one per user.
///
/// Stored at: `USER#{user_id}` / `PROFILE`.
///
/// `score`, `streak` and `max_streak` are only ever changed through
/// conditional increments, never by rewriting the whole record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub description: String,
    /// Leaderboard participation opt-in
    #[serde(default)]
    pub leaderboard: bool,
    /// Registration time (Unix seconds)
    #[serde(default)]
    pub created_at: i64,
    /// Consecutive concludes with a non-negative rating
    #[serde(default)]
    pub streak: i64,
    /// Cumulative rating
    #[serde(default)]
    pub score: f64,
    /// Highest streak ever reached
    #[serde(default)]
    pub max_streak: i64,
}
