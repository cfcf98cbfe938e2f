// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Timer state machine for a single event.
//!
//! Planned -> Running -> Concluded. Every transition is a conditional write
//! on the event record, so concurrent calls on the same event race in the
//! store and exactly one of them wins. A lost race is reported to the
//! caller, never retried.
//!
//! Stop is a sequence of three independent writes:
//! 1. Conclude the event (immutable from here on)
//! 2. Fold the rating into the profile
//! 3. Enqueue a leaderboard update (opted-in users only)
//!
//! A failure after step 1 leaves the event concluded without the later
//! steps. Retrying is rejected by the immutability guard, so nothing is
//! ever counted twice.

use std::time::Duration;

use crate::db::events::EventTimer;
use crate::db::{EventStore, ProfileStore};
use crate::error::{AppError, Result, StoreError};
use crate::models::{Event, RatingUpdate};
use crate::queue::RatingChannel;
use crate::services::rating::calculate_rating_change;
use crate::services::{system_clock, Clock};
use crate::time_utils::from_unix;

/// Starts and stops event timers.
#[derive(Clone)]
pub struct TimingService {
    events: EventStore,
    profiles: ProfileStore,
    channel: RatingChannel,
    anchor: Duration,
    clock: Clock,
}

impl TimingService {
    pub fn new(
        events: EventStore,
        profiles: ProfileStore,
        channel: RatingChannel,
        anchor: Duration,
    ) -> Self {
        Self {
            events,
            profiles,
            channel,
            anchor,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Start the timer of a planned event.
    pub async fn start(&self, user_id: &str, event_id: &str) -> Result<Event> {
        let mut event = self.load_mutable(user_id, event_id).await?;
        if event.timer_start_time != 0 {
            return Err(AppError::FailedPrecondition(
                "event already started".to_string(),
            ));
        }

        let now = (self.clock)().timestamp();
        let timer = EventTimer {
            timer_start_time: now,
            timer_stop_time: 0,
            rating_change: 0.0,
            rating_algorithm: String::new(),
            immutable: false,
        };

        self.events
            .update_event_timer(user_id, event_id, &timer, 0)
            .await
            .map_err(|e| lost_race(e, "event was started or concluded concurrently"))?;

        tracing::info!(user_id, event_id, timer_start_time = now, "Event timer started");

        event.timer_start_time = now;
        Ok(event)
    }

    /// Stop a running event, rate it and publish the rating.
    pub async fn stop(&self, user_id: &str, event_id: &str) -> Result<Event> {
        let profile = self.profiles.get_profile(user_id).await?.ok_or_else(|| {
            // Valid token without a profile: make the client authenticate again.
            tracing::warn!(user_id, "Stop for user without profile");
            AppError::Unauthenticated("invalid access token".to_string())
        })?;

        let mut event = self.load_mutable(user_id, event_id).await?;
        if event.timer_start_time == 0 {
            return Err(AppError::FailedPrecondition(
                "event was not started".to_string(),
            ));
        }

        let now = (self.clock)();
        let (algorithm, rating_change) = calculate_rating_change(
            from_unix(event.start_time),
            from_unix(event.stop_time),
            from_unix(event.timer_start_time),
            now,
            profile.streak,
            self.anchor,
        );

        let timer = EventTimer {
            timer_start_time: event.timer_start_time,
            timer_stop_time: now.timestamp(),
            rating_change,
            rating_algorithm: algorithm.clone(),
            immutable: true,
        };
        self.events
            .update_event_timer(user_id, event_id, &timer, event.timer_start_time)
            .await
            .map_err(|e| lost_race(e, "event was concluded concurrently"))?;

        tracing::info!(
            user_id,
            event_id,
            rating_change,
            algorithm = %algorithm,
            "Event concluded"
        );

        let streak = self
            .profiles
            .update_profile_rating(user_id, rating_change)
            .await
            .map_err(|e| {
                tracing::error!(user_id, event_id, error = %e, "Concluded event not applied to profile");
                AppError::from(e)
            })?;

        if profile.leaderboard {
            let update = RatingUpdate {
                user_id: user_id.to_string(),
                username: profile.username.clone(),
                streak,
                algorithm: algorithm.clone(),
                rating_change,
                time: now.timestamp(),
            };
            self.channel.send_update(&update).await.map_err(|e| {
                tracing::error!(user_id, event_id, error = %e, "Rating update not published");
                AppError::from(e)
            })?;
        }

        event.timer_stop_time = now.timestamp();
        event.rating_change = rating_change;
        event.rating_algorithm = algorithm;
        event.immutable = true;
        Ok(event)
    }

    /// Load an event that may still change state.
    ///
    /// The immutability check here only gives a friendlier error; the
    /// conditional write enforces it.
    async fn load_mutable(&self, user_id: &str, event_id: &str) -> Result<Event> {
        let event = self
            .events
            .get_event(user_id, event_id)
            .await?
            .ok_or_else(|| AppError::NotFound("event does not exist".to_string()))?;
        if event.immutable {
            return Err(AppError::FailedPrecondition(
                "event already concluded".to_string(),
            ));
        }
        Ok(event)
    }
}

fn lost_race(err: StoreError, message: &str) -> AppError {
    match err {
        StoreError::PreconditionFailed => AppError::FailedPrecondition(message.to_string()),
        other => other.into(),
    }
}
