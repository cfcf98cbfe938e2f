// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profile repository.

use serde_json::Value;
use std::sync::Arc;

use super::events::user_pk;
use super::{Item, ItemKey, KeyValueStore, Patch, Predicate};
use crate::error::StoreError;
use crate::models::Profile;

const PROFILE_SK: &str = "PROFILE";

fn profile_key(user_id: &str) -> ItemKey {
    ItemKey::new(user_pk(user_id), PROFILE_SK)
}

/// Typed access to profile records.
#[derive(Clone)]
pub struct ProfileStore {
    kv: Arc<dyn KeyValueStore>,
}

impl ProfileStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError> {
        match self.kv.get(&profile_key(user_id)).await? {
            Some(item) => serde_json::from_value(Value::Object(item))
                .map(Some)
                .map_err(|e| StoreError::Transport(format!("corrupt profile record: {}", e))),
            None => Ok(None),
        }
    }

    /// Create a profile; fails with `PreconditionFailed` if one already exists.
    pub async fn put_profile(&self, user_id: &str, profile: &Profile) -> Result<(), StoreError> {
        let item = match serde_json::to_value(profile) {
            Ok(Value::Object(item)) => item,
            _ => {
                return Err(StoreError::InvalidArgument(
                    "profile is not a record".to_string(),
                ))
            }
        };
        self.kv
            .put_conditional(&profile_key(user_id), item, &Predicate::NotExists)
            .await
    }

    /// Update the user-editable fields of an existing profile.
    ///
    /// Rating statistics are left alone.
    pub async fn update_profile(
        &self,
        user_id: &str,
        username: &str,
        description: &str,
        leaderboard: bool,
    ) -> Result<Profile, StoreError> {
        let patch = Patch::new()
            .set("username", username)
            .set("description", description)
            .set("leaderboard", leaderboard);
        let item = self
            .kv
            .update_conditional(&profile_key(user_id), &patch, &Predicate::Exists)
            .await?;
        decode(item)
    }

    /// Fold one concluded event's rating into the profile.
    ///
    /// The score grows by `rating_change`. A non-negative change extends the
    /// streak by one, a negative change resets it to zero. Returns the streak
    /// after the update. The max streak is raised separately and only if the
    /// new streak exceeds it; losing that race to a concurrent conclude is fine.
    pub async fn update_profile_rating(
        &self,
        user_id: &str,
        rating_change: f64,
    ) -> Result<i64, StoreError> {
        let key = profile_key(user_id);
        let score = serde_json::Number::from_f64(rating_change)
            .ok_or_else(|| StoreError::InvalidArgument("rating is not a finite number".to_string()))?;

        let patch = if rating_change >= 0.0 {
            Patch::new().add("score", Value::Number(score)).add("streak", 1)
        } else {
            Patch::new().add("score", Value::Number(score)).set("streak", 0)
        };

        let updated = self
            .kv
            .update_conditional(&key, &patch, &Predicate::Exists)
            .await?;
        let streak = updated.get("streak").and_then(Value::as_i64).unwrap_or(0);

        let raise_max = Patch::new().set("max_streak", streak);
        match self
            .kv
            .update_conditional(&key, &raise_max, &Predicate::less_than("max_streak", streak))
            .await
        {
            Ok(_) => {}
            Err(StoreError::PreconditionFailed) => {
                tracing::debug!(user_id = %user_id, streak, "Max streak not raised");
            }
            Err(e) => return Err(e),
        }

        Ok(streak)
    }

    pub async fn delete_profile(&self, user_id: &str) -> Result<(), StoreError> {
        self.kv.delete(&profile_key(user_id)).await
    }
}

fn decode(item: Item) -> Result<Profile, StoreError> {
    serde_json::from_value(Value::Object(item))
        .map_err(|e| StoreError::Transport(format!("corrupt profile record: {}", e)))
}
