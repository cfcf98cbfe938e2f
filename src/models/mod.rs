// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod board;
pub mod event;
pub mod profile;
pub mod rating;

pub use board::{Board, BoardEntry, Leaderboard, Standing};
pub use event::{Event, EventInput, EventState, EventType};
pub use profile::Profile;
pub use rating::RatingUpdate;
