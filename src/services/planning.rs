// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Event planning: create, move, list and delete events.

use validator::Validate;

use crate::db::EventStore;
use crate::error::{AppError, Result, StoreError};
use crate::models::{Event, EventInput};
use crate::services::{system_clock, Clock};

/// Plans events for a user.
#[derive(Clone)]
pub struct PlanningService {
    events: EventStore,
    clock: Clock,
}

impl PlanningService {
    pub fn new(events: EventStore) -> Self {
        Self {
            events,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Events starting within `[since, until]`, at most 100, by start time.
    pub async fn list(&self, user_id: &str, since: i64, until: i64) -> Result<Vec<Event>> {
        if since > until {
            return Err(AppError::InvalidArgument(
                "since must not be after until".to_string(),
            ));
        }
        Ok(self.events.list_events(user_id, since, until).await?)
    }

    /// Store an event in the planned state.
    ///
    /// When `input.id` names a different start time, the event moved and the
    /// record under the old id is removed after the new one is written.
    pub async fn upsert(&self, user_id: &str, input: &EventInput) -> Result<Event> {
        let event = planned_event(input)?;
        let now = (self.clock)().timestamp();

        self.events
            .put_event(user_id, &event, now)
            .await
            .map_err(refused_overwrite)?;

        if let Some(previous) = moved_from(input, &event) {
            // The new record is already in place; a stale leftover only costs a listing entry.
            if let Err(e) = self.events.delete_event(user_id, previous).await {
                tracing::warn!(user_id, previous_id = previous, error = %e, "Failed to remove moved event");
            }
        }

        tracing::debug!(user_id, event_id = %event.id(), "Event planned");
        Ok(event)
    }

    /// Store several events and drop the records they replace, all or nothing.
    pub async fn upsert_batch(&self, user_id: &str, inputs: &[EventInput]) -> Result<Vec<Event>> {
        let events = inputs
            .iter()
            .map(planned_event)
            .collect::<Result<Vec<_>>>()?;
        let superseded: Vec<String> = inputs
            .iter()
            .zip(&events)
            .filter_map(|(input, event)| moved_from(input, event).map(str::to_string))
            .collect();
        let now = (self.clock)().timestamp();

        self.events
            .put_events(user_id, &events, &superseded, now)
            .await
            .map_err(refused_overwrite)?;

        tracing::debug!(
            user_id,
            count = events.len(),
            superseded = superseded.len(),
            "Events planned"
        );
        Ok(events)
    }

    pub async fn delete(&self, user_id: &str, event_id: &str) -> Result<()> {
        self.events.delete_event(user_id, event_id).await?;
        tracing::debug!(user_id, event_id, "Event deleted");
        Ok(())
    }
}

fn planned_event(input: &EventInput) -> Result<Event> {
    input
        .validate()
        .map_err(|e| AppError::InvalidArgument(e.to_string()))?;
    if input.stop_time <= input.start_time {
        return Err(AppError::InvalidArgument(
            "stop_time must be after start_time".to_string(),
        ));
    }
    Ok(input.to_planned_event())
}

/// Previous id of an event that changed its start time.
fn moved_from<'a>(input: &'a EventInput, event: &Event) -> Option<&'a str> {
    input
        .id
        .as_deref()
        .filter(|id| !id.is_empty() && *id != event.id())
}

fn refused_overwrite(err: StoreError) -> AppError {
    match err {
        StoreError::PreconditionFailed => AppError::FailedPrecondition(
            "cannot overwrite a live or concluded event".to_string(),
        ),
        other => other.into(),
    }
}
