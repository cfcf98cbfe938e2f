// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Leaderboard aggregation.
//!
//! Rating updates arrive at least once through the rating channel and are
//! folded into the board of the current ISO week. The board is written back
//! with a version check; a conflicting writer makes the whole batch start
//! over from a fresh read. Merging is keyed by contribution timestamp, so
//! redelivered or re-merged updates leave the board unchanged.

use std::time::Duration;
use tokio::sync::watch;

use crate::config::LeaderboardConfig;
use crate::db::BoardStore;
use crate::error::{AppError, Result, StoreError};
use crate::models::{Board, Leaderboard, RatingUpdate};
use crate::queue::RatingChannel;
use crate::services::{system_clock, Clock};
use crate::time_utils::iso_week;

/// Upper bound for a single backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Exponential backoff between conflicting board writes.
#[derive(Debug)]
struct Backoff {
    base: Duration,
    attempt: u32,
}

impl Backoff {
    fn new(base: Duration) -> Self {
        Self { base, attempt: 0 }
    }

    fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(16));
        self.attempt += 1;
        self.base.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Merges rating updates into weekly boards and serves standings.
#[derive(Clone)]
pub struct LeaderboardService {
    boards: BoardStore,
    channel: RatingChannel,
    max_attempts: u32,
    backoff_base: Duration,
    clock: Clock,
}

impl LeaderboardService {
    pub fn new(boards: BoardStore, channel: RatingChannel, config: &LeaderboardConfig) -> Self {
        Self {
            boards,
            channel,
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Merge a batch into the current week's board.
    ///
    /// Retries the full read-merge-write on a conflicting writer and gives up
    /// with `Unavailable` after the configured number of attempts.
    pub async fn aggregate(&self, updates: &[RatingUpdate]) -> Result<Board> {
        let mut backoff = Backoff::new(self.backoff_base);

        for attempt in 1..=self.max_attempts {
            let now = (self.clock)();
            let (year, week) = iso_week(now);

            let mut board = match self.boards.get_board(year, week).await? {
                Some(board) => board,
                None => {
                    tracing::info!(year, week, "Creating new weekly board");
                    Board::new(year, week)
                }
            };

            for update in updates {
                board.apply(update, now.timestamp());
            }

            match self.boards.put_board(&board).await {
                Ok(version) => {
                    tracing::info!(
                        year,
                        week,
                        batch_size = updates.len(),
                        attempt,
                        "Board updated"
                    );
                    board.version = Some(version);
                    return Ok(board);
                }
                Err(StoreError::PreconditionFailed) => {
                    if attempt == self.max_attempts {
                        break;
                    }
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        year,
                        week,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Board changed concurrently, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Unavailable(format!(
            "board still contended after {} attempts",
            self.max_attempts
        )))
    }

    /// Receive one batch, merge it and acknowledge it.
    ///
    /// Messages are acknowledged only after the board write succeeded; on
    /// any error they are left to reappear after their visibility timeout.
    /// Returns the number of messages received.
    pub async fn drain_once(&self) -> Result<usize> {
        let deliveries = self.channel.read_updates().await?;
        if deliveries.is_empty() {
            return Ok(0);
        }
        tracing::debug!(batch_size = deliveries.len(), "Processing rating updates");

        let mut updates = Vec::with_capacity(deliveries.len());
        let mut accepted = Vec::with_capacity(deliveries.len());
        for delivery in &deliveries {
            match RatingChannel::parse(delivery) {
                Ok(update) => {
                    updates.push(update);
                    accepted.push(delivery);
                }
                Err(e) => {
                    // Redelivery cannot fix a malformed message.
                    tracing::error!(
                        message_id = %delivery.message_id,
                        error = %e,
                        "Dropping malformed rating update"
                    );
                    self.channel.delete_update(delivery).await?;
                }
            }
        }

        if !updates.is_empty() {
            self.aggregate(&updates).await?;
        }
        for delivery in accepted {
            self.channel.delete_update(delivery).await?;
        }

        Ok(deliveries.len())
    }

    /// Drain the channel until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Leaderboard aggregator started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                result = self.drain_once() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Aggregation batch failed; messages will be redelivered");
                        tokio::time::sleep(self.backoff_base.max(Duration::from_millis(100))).await;
                    }
                }
            }
        }

        tracing::info!("Leaderboard aggregator stopped");
    }

    /// Standings of a week, the current one if `week` is `None`.
    ///
    /// A week without a board has empty standings.
    pub async fn standings(&self, week: Option<(i32, u32)>) -> Result<Leaderboard> {
        let (year, week) = week.unwrap_or_else(|| iso_week((self.clock)()));
        if !(1..=53).contains(&week) {
            return Err(AppError::InvalidArgument(format!(
                "week {} is out of range",
                week
            )));
        }

        let board = self
            .boards
            .get_board(year, week)
            .await?
            .unwrap_or_else(|| Board::new(year, week));
        Ok(Leaderboard::from(&board))
    }
}
