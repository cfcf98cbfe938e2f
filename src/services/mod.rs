// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod leaderboard;
pub mod planning;
pub mod rating;
pub mod timing;

pub use leaderboard::LeaderboardService;
pub use planning::PlanningService;
pub use rating::calculate_rating_change;
pub use timing::TimingService;

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Source of "now" for services; replaced in tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}
