// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for authenticated users.
//!
//! Handlers only translate between HTTP and the services. Every service call
//! runs under the configured request deadline.

use crate::error::{AppError, Result};
use crate::middleware::Principal;
use crate::models::{Event, EventInput, Leaderboard};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;

/// API routes (require authentication via bearer token).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/events", get(list_events).put(upsert_event))
        .route("/api/events/batch", post(upsert_events))
        .route("/api/events/{id}", delete(delete_event))
        .route("/api/events/{id}/start", post(start_event))
        .route("/api/events/{id}/stop", post(stop_event))
        .route("/api/leaderboard", get(get_leaderboard))
}

/// Run a service call under the request deadline.
async fn with_deadline<T>(
    state: &AppState,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(state.config.request_timeout, call)
        .await
        .map_err(|_| AppError::DeadlineExceeded)?
}

// ─── Planning ────────────────────────────────────────────────

#[derive(Deserialize)]
struct EventsQuery {
    /// Earliest planned start (Unix seconds)
    since: i64,
    /// Latest planned start (Unix seconds)
    until: i64,
}

/// List the caller's events in a start-time window.
async fn list_events(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<Event>>> {
    let events = with_deadline(
        &state,
        state
            .planning
            .list(&principal.user_id, query.since, query.until),
    )
    .await?;
    Ok(Json(events))
}

/// Create or move a planned event.
async fn upsert_event(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(input): Json<EventInput>,
) -> Result<Json<Event>> {
    let event = with_deadline(&state, state.planning.upsert(&principal.user_id, &input)).await?;
    Ok(Json(event))
}

#[derive(Deserialize)]
struct BatchRequest {
    events: Vec<EventInput>,
}

/// Plan several events at once, all or nothing.
async fn upsert_events(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<Vec<Event>>> {
    let events = with_deadline(
        &state,
        state
            .planning
            .upsert_batch(&principal.user_id, &request.events),
    )
    .await?;
    Ok(Json(events))
}

async fn delete_event(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(event_id): Path<String>,
) -> Result<StatusCode> {
    with_deadline(&state, state.planning.delete(&principal.user_id, &event_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Timing ──────────────────────────────────────────────────

async fn start_event(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(event_id): Path<String>,
) -> Result<Json<Event>> {
    let event = with_deadline(&state, state.timing.start(&principal.user_id, &event_id)).await?;
    Ok(Json(event))
}

/// Conclude an event and score it.
async fn stop_event(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(event_id): Path<String>,
) -> Result<Json<Event>> {
    let event = with_deadline(&state, state.timing.stop(&principal.user_id, &event_id)).await?;
    Ok(Json(event))
}

// ─── Leaderboard ─────────────────────────────────────────────

#[derive(Deserialize)]
struct LeaderboardQuery {
    year: Option<i32>,
    week: Option<u32>,
}

/// Standings of an ISO week; the current week when none is given.
async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Leaderboard>> {
    let week = match (query.year, query.week) {
        (Some(year), Some(week)) => Some((year, week)),
        (None, None) => None,
        _ => {
            return Err(AppError::InvalidArgument(
                "year and week must be given together".to_string(),
            ))
        }
    };

    let leaderboard = with_deadline(&state, state.leaderboard.standings(week)).await?;
    Ok(Json(leaderboard))
}
