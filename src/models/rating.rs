// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Rating update envelope carried from the timing service to the leaderboard.

use serde::{Deserialize, Serialize};

/// One rating contribution of a concluded event.
///
/// Sent once per stop, but the channel may deliver it more than once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingUpdate {
    pub user_id: String,
    pub username: String,
    /// Streak after the contribution was applied to the profile
    pub streak: i64,
    /// Rating algorithm tag, e.g. `v0.0.1-2m0s`
    pub algorithm: String,
    pub rating_change: f64,
    /// Timer stop (Unix seconds); the board's idempotency key
    pub time: i64,
}
