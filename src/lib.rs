// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Zen: punctuality scoring for planned habits.
//!
//! This crate provides the backend API for planning events, timing them,
//! rating how closely the timer followed the plan, and aggregating ratings
//! into weekly leaderboards.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod queue;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::{Config, StorageBackend};
use db::{BoardStore, EventStore, FirestoreDb, KeyValueStore, ObjectStore, ProfileStore};
use queue::{FirestoreQueue, MemoryQueue, MessageQueue, RatingChannel};
use services::{LeaderboardService, PlanningService, TimingService};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub planning: PlanningService,
    pub timing: TimingService,
    pub leaderboard: LeaderboardService,
    /// Profiles are created by the account service; exposed for it and for tests.
    pub profiles: ProfileStore,
}

impl AppState {
    /// Wire the services onto the given storage and queue backends.
    pub fn from_backends(
        config: Config,
        records: Arc<dyn KeyValueStore>,
        objects: Arc<dyn ObjectStore>,
        queue: Arc<dyn MessageQueue>,
    ) -> Self {
        let events = EventStore::new(records.clone());
        let profiles = ProfileStore::new(records);
        let boards = BoardStore::new(objects, config.leaderboard.board_prefix.clone());
        let channel = RatingChannel::new(queue, &config.leaderboard);

        Self {
            planning: PlanningService::new(events.clone()),
            timing: TimingService::new(
                events,
                profiles.clone(),
                channel.clone(),
                config.rating_anchor,
            ),
            leaderboard: LeaderboardService::new(boards, channel, &config.leaderboard),
            profiles,
            config,
        }
    }

    /// State backed entirely by process memory.
    pub fn in_memory(config: Config) -> Self {
        let queue = Arc::new(MemoryQueue::new(config.leaderboard.max_receives));
        Self::from_backends(
            config,
            Arc::new(db::MemoryKeyValueStore::new()),
            Arc::new(db::MemoryObjectStore::new()),
            queue,
        )
    }

    /// State for the configured storage backend.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        match config.storage_backend {
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; data is lost on restart");
                Ok(Self::in_memory(config))
            }
            StorageBackend::Firestore => {
                let db = FirestoreDb::new(&config.gcp_project_id).await?;
                let queue = Arc::new(FirestoreQueue::new(
                    db.clone(),
                    config.leaderboard.max_receives,
                ));
                let db = Arc::new(db);
                Ok(Self::from_backends(config, db.clone(), db, queue))
            }
        }
    }
}
