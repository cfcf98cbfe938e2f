// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Scheduled habit occurrences.

use serde::{Deserialize, Serialize};
use validator::Validate;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Kind of habit an event belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum EventType {
    #[default]
    Unspecified,
    Focus,
    Break,
    Exercise,
    Meditation,
    Sleep,
    Other,
}

/// Timer lifecycle of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    /// Scheduled, timer untouched
    Planned,
    /// Timer started, not yet stopped
    Running,
    /// Timer stopped and rated; read-only from here on
    Concluded,
}

/// Stored event record.
///
/// Stored at: `USER#{user_id}` / `EVENT#{start_time}`. The planned start time
/// is the identity, so moving an event means writing a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Event {
    #[serde(rename = "type", default)]
    pub event_type: EventType,
    pub name: String,
    /// Planned start (Unix seconds)
    pub start_time: i64,
    /// Planned stop (Unix seconds)
    pub stop_time: i64,
    /// Actual start; 0 while planned
    #[serde(default)]
    pub timer_start_time: i64,
    /// Actual stop; 0 until concluded
    #[serde(default)]
    pub timer_stop_time: i64,
    #[serde(default)]
    pub rating_change: f64,
    #[serde(default)]
    pub rating_algorithm: String,
    #[serde(default)]
    pub immutable: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music_url: Option<String>,
}

impl Event {
    /// Event identifier (the planned start time).
    pub fn id(&self) -> String {
        self.start_time.to_string()
    }

    pub fn state(&self) -> EventState {
        if self.immutable {
            EventState::Concluded
        } else if self.timer_start_time != 0 {
            EventState::Running
        } else {
            EventState::Planned
        }
    }
}

/// Client-supplied event for planning calls.
///
/// Timer and rating fields are never accepted from clients; an upsert always
/// produces a planned event.
#[derive(Debug, Clone, Deserialize, Validate)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct EventInput {
    /// Previous identifier when an existing event is edited or moved
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub event_type: EventType,
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(range(min = 0))]
    pub start_time: i64,
    pub stop_time: i64,
    #[serde(default)]
    #[validate(length(max = 2048))]
    pub description: String,
    #[serde(default)]
    #[validate(url)]
    pub music_url: Option<String>,
}

impl EventInput {
    /// The planned event this input describes.
    pub fn to_planned_event(&self) -> Event {
        Event {
            event_type: self.event_type,
            name: self.name.trim().to_string(),
            start_time: self.start_time,
            stop_time: self.stop_time,
            timer_start_time: 0,
            timer_stop_time: 0,
            rating_change: 0.0,
            rating_algorithm: String::new(),
            immutable: false,
            description: self.description.clone(),
            music_url: self.music_url.clone().filter(|url| !url.is_empty()),
        }
    }
}
