//! Weekly leaderboard aggregate.
//!
//! A board collects every rating contribution of one ISO week. Ratings are
//! kept per contribution timestamp instead of as a running sum, so merging
//! the same envelope twice leaves the board unchanged. Totals are computed
//! when the board is read.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::models::RatingUpdate;

/// Board document, one per ISO (year, week).
///
/// Stored at: `<year>-<week>.json` in the board object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    /// Version tag of the stored object this board was read from.
    /// `None` for a board that has never been written.
    #[serde(skip)]
    pub version: Option<String>,
    pub year: i32,
    pub week: u32,
    /// Algorithm tag -> last time (Unix seconds) a contribution used it
    #[serde(default)]
    pub algorithms: BTreeMap<String, i64>,
    /// User ID -> entry
    #[serde(default)]
    pub entries: BTreeMap<String, BoardEntry>,
}

/// One user's contributions within a week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardEntry {
    pub user_id: String,
    pub username: String,
    pub streak: i64,
    /// Contribution timestamp (Unix seconds) -> rating change
    #[serde(default)]
    pub rating: BTreeMap<i64, f64>,
}

/// Computed leaderboard row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Standing {
    pub user_id: String,
    pub username: String,
    pub streak: i64,
    pub rating: f64,
    pub contributions: u32,
}

/// Standings of one week as served to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Leaderboard {
    pub year: i32,
    pub week: u32,
    /// Algorithm tags that contributed this week
    pub algorithms: Vec<String>,
    pub standings: Vec<Standing>,
}

impl Board {
    /// Empty board for a week that has no stored object yet.
    pub fn new(year: i32, week: u32) -> Self {
        Self {
            version: None,
            year,
            week,
            algorithms: BTreeMap::new(),
            entries: BTreeMap::new(),
        }
    }

    /// Object key of a week's board.
    pub fn key_for(year: i32, week: u32) -> String {
        format!("{}-{}.json", year, week)
    }

    pub fn key(&self) -> String {
        Self::key_for(self.year, self.week)
    }

    /// Merge one rating update.
    ///
    /// The rating is written under the update's timestamp, overwriting any
    /// earlier value for that key, so re-applying a redelivered update is a no-op.
    pub fn apply(&mut self, update: &RatingUpdate, now: i64) {
        self.algorithms.insert(update.algorithm.clone(), now);

        let entry = self
            .entries
            .entry(update.user_id.clone())
            .or_insert_with(|| BoardEntry {
                user_id: update.user_id.clone(),
                username: update.username.clone(),
                streak: update.streak,
                rating: BTreeMap::new(),
            });
        entry.streak = update.streak;
        entry.rating.insert(update.time, update.rating_change);
    }

    /// Per-user totals, best first.
    pub fn standings(&self) -> Vec<Standing> {
        let mut standings: Vec<Standing> = self
            .entries
            .values()
            .map(|entry| Standing {
                user_id: entry.user_id.clone(),
                username: entry.username.clone(),
                streak: entry.streak,
                rating: entry.total_rating(),
                contributions: entry.rating.len() as u32,
            })
            .collect();

        standings.sort_by(|a, b| {
            b.rating
                .total_cmp(&a.rating)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        standings
    }
}

impl From<&Board> for Leaderboard {
    fn from(board: &Board) -> Self {
        Self {
            year: board.year,
            week: board.week,
            algorithms: board.algorithms.keys().cloned().collect(),
            standings: board.standings(),
        }
    }
}

impl BoardEntry {
    /// Sum of all contributions this week.
    pub fn total_rating(&self) -> f64 {
        self.rating.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(user: &str, time: i64, change: f64, streak: i64) -> RatingUpdate {
        RatingUpdate {
            user_id: user.to_string(),
            username: format!("{}-name", user),
            streak,
            algorithm: "v0.0.1-2m0s".to_string(),
            rating_change: change,
            time,
        }
    }

    #[test]
    fn test_apply_creates_entry() {
        let mut board = Board::new(2026, 42);
        board.apply(&update("alice", 1000, 120.0, 11), 2000);

        let entry = board.entries.get("alice").unwrap();
        assert_eq!(entry.username, "alice-name");
        assert_eq!(entry.streak, 11);
        assert_eq!(entry.rating.get(&1000), Some(&120.0));
        assert_eq!(board.algorithms.get("v0.0.1-2m0s"), Some(&2000));
    }

    #[test]
    fn test_redelivery_is_idempotent() {
        let envelope = update("alice", 1000, 120.0, 11);

        let mut once = Board::new(2026, 42);
        once.apply(&envelope, 2000);

        let mut twice = once.clone();
        twice.apply(&envelope, 2000);

        assert_eq!(once, twice);
        assert_eq!(twice.entries["alice"].total_rating(), 120.0);
    }

    #[test]
    fn test_same_timestamp_last_write_wins() {
        let mut board = Board::new(2026, 42);
        board.apply(&update("alice", 1000, 120.0, 11), 2000);
        board.apply(&update("alice", 1000, -40.0, 0), 2001);

        let entry = &board.entries["alice"];
        assert_eq!(entry.rating.len(), 1);
        assert_eq!(entry.total_rating(), -40.0); // Overwritten, not summed
        assert_eq!(entry.streak, 0);
    }

    #[test]
    fn test_standings_sum_contributions() {
        let mut board = Board::new(2026, 42);
        board.apply(&update("alice", 1000, 100.0, 10), 2000);
        board.apply(&update("alice", 1100, 50.0, 11), 2000);
        board.apply(&update("bob", 1050, 200.0, 20), 2000);
        board.apply(&update("carol", 1060, -30.0, 0), 2000);

        let standings = board.standings();
        let order: Vec<&str> = standings.iter().map(|s| s.user_id.as_str()).collect();
        assert_eq!(order, vec!["bob", "alice", "carol"]);
        assert_eq!(standings[1].rating, 150.0);
        assert_eq!(standings[1].contributions, 2);
        assert_eq!(standings[1].streak, 11);
    }

    #[test]
    fn test_json_round_trip() {
        let mut board = Board::new(2026, 42);
        board.apply(&update("alice", 1000, 100.5, 10), 2000);
        board.apply(&update("bob", 1050, -12.25, 0), 2001);
        board.version = Some("etag".to_string());

        let raw = serde_json::to_vec(&board).unwrap();
        let reloaded: Board = serde_json::from_slice(&raw).unwrap();

        // The version tag belongs to the stored object, not the document.
        assert_eq!(reloaded.version, None);
        assert_eq!(reloaded.algorithms, board.algorithms);
        assert_eq!(reloaded.entries, board.entries);
    }

    #[test]
    fn test_key_format() {
        assert_eq!(Board::key_for(2026, 7), "2026-7.json");
    }
}
