// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Event repository over the key-value store.
//!
//! Events live in the user's partition under `EVENT#{start_time}`. The sort
//! key zero-pads the start time so lexicographic order equals time order.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use super::{Item, ItemKey, KeyValueStore, Patch, Predicate, SortKeyRange, TransactWrite};
use crate::error::StoreError;
use crate::models::Event;

/// Maximum number of events returned by a window query.
pub const MAX_EVENTS_PER_QUERY: usize = 100;

pub(crate) fn user_pk(user_id: &str) -> String {
    format!("USER#{}", user_id)
}

/// Padded to the width of `i64::MAX` so every non-negative start time sorts.
fn event_sk(start_time: i64) -> String {
    format!("EVENT#{:019}", start_time.max(0))
}

/// Resolve an event id (decimal start time) to its record key.
fn event_key(user_id: &str, event_id: &str) -> Result<ItemKey, StoreError> {
    let start_time: i64 = event_id
        .parse()
        .map_err(|_| StoreError::InvalidArgument(format!("invalid event id '{}'", event_id)))?;
    if start_time < 0 {
        return Err(StoreError::InvalidArgument(format!(
            "invalid event id '{}'",
            event_id
        )));
    }
    Ok(ItemKey::new(user_pk(user_id), event_sk(start_time)))
}

/// Timer fields written by a start or stop transition.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTimer {
    pub timer_start_time: i64,
    pub timer_stop_time: i64,
    pub rating_change: f64,
    pub rating_algorithm: String,
    pub immutable: bool,
}

/// Typed access to event records.
#[derive(Clone)]
pub struct EventStore {
    kv: Arc<dyn KeyValueStore>,
}

impl EventStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Guard for writing a planned event over whatever is stored at its key.
    ///
    /// A write is refused when the stored event is immutable, has a running
    /// timer, or has not yet reached its planned stop time.
    fn put_guard(now: i64) -> Predicate {
        Predicate::Any(vec![
            Predicate::NotExists,
            Predicate::All(vec![
                Predicate::equals("immutable", false),
                Predicate::equals("timer_start_time", 0),
                Predicate::greater_than("stop_time", now).negate(),
            ]),
        ])
    }

    /// Get an event by id.
    pub async fn get_event(&self, user_id: &str, event_id: &str) -> Result<Option<Event>, StoreError> {
        let key = event_key(user_id, event_id)?;
        self.kv.get(&key).await?.map(decode_event).transpose()
    }

    /// Events whose planned start lies within `[since, until]`, ordered by start.
    pub async fn list_events(
        &self,
        user_id: &str,
        since: i64,
        until: i64,
    ) -> Result<Vec<Event>, StoreError> {
        let range = SortKeyRange {
            start: event_sk(since),
            end: event_sk(until),
        };
        self.kv
            .query(&user_pk(user_id), &range, MAX_EVENTS_PER_QUERY)
            .await?
            .into_iter()
            .map(decode_event)
            .collect()
    }

    /// Store a planned event under its start time.
    ///
    /// Fails with `PreconditionFailed` if the existing record is live or immutable.
    pub async fn put_event(&self, user_id: &str, event: &Event, now: i64) -> Result<(), StoreError> {
        let key = ItemKey::new(user_pk(user_id), event_sk(event.start_time));
        self.kv
            .put_conditional(&key, encode_event(event)?, &Self::put_guard(now))
            .await
    }

    /// Insert all `events` and delete the `superseded` ids in one all-or-nothing write.
    ///
    /// Superseded ids that collide with an inserted event are kept.
    pub async fn put_events(
        &self,
        user_id: &str,
        events: &[Event],
        superseded: &[String],
        now: i64,
    ) -> Result<(), StoreError> {
        let mut writes = Vec::with_capacity(events.len() + superseded.len());
        let mut inserted = HashSet::new();

        for event in events {
            inserted.insert(event.id());
            writes.push(TransactWrite::Put {
                key: ItemKey::new(user_pk(user_id), event_sk(event.start_time)),
                item: encode_event(event)?,
                predicate: Self::put_guard(now),
            });
        }

        for id in superseded {
            if id.is_empty() || inserted.contains(id) {
                continue;
            }
            writes.push(TransactWrite::Delete {
                key: event_key(user_id, id)?,
            });
        }

        self.kv.transact_write(writes).await
    }

    /// Write timer fields, guarded so a concluded event is never touched.
    ///
    /// `expected_timer_start` pins the timer start observed by the caller:
    /// a start only succeeds on a planned event (`Some(0)`), a stop only on
    /// the run it rated.
    pub async fn update_event_timer(
        &self,
        user_id: &str,
        event_id: &str,
        timer: &EventTimer,
        expected_timer_start: i64,
    ) -> Result<(), StoreError> {
        let key = event_key(user_id, event_id)?;
        let patch = Patch::new()
            .set("timer_start_time", timer.timer_start_time)
            .set("timer_stop_time", timer.timer_stop_time)
            .set("rating_change", finite(timer.rating_change)?)
            .set("rating_algorithm", timer.rating_algorithm.clone())
            .set("immutable", timer.immutable);
        let guard = Predicate::All(vec![
            Predicate::Exists,
            Predicate::equals("immutable", false),
            Predicate::equals("timer_start_time", expected_timer_start),
        ]);

        self.kv.update_conditional(&key, &patch, &guard).await?;
        Ok(())
    }

    /// Delete an event; deleting a missing event succeeds.
    pub async fn delete_event(&self, user_id: &str, event_id: &str) -> Result<(), StoreError> {
        self.kv.delete(&event_key(user_id, event_id)?).await
    }
}

fn finite(value: f64) -> Result<Value, StoreError> {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| StoreError::InvalidArgument("rating is not a finite number".to_string()))
}

fn encode_event(event: &Event) -> Result<Item, StoreError> {
    match serde_json::to_value(event) {
        Ok(Value::Object(item)) => Ok(item),
        Ok(_) => Err(StoreError::InvalidArgument("event is not a record".to_string())),
        Err(e) => Err(StoreError::InvalidArgument(e.to_string())),
    }
}

fn decode_event(item: Item) -> Result<Event, StoreError> {
    serde_json::from_value(Value::Object(item))
        .map_err(|e| StoreError::Transport(format!("corrupt event record: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryKeyValueStore;
    use crate::models::EventType;

    const NOW: i64 = 1_800_000_000;

    fn store() -> EventStore {
        EventStore::new(Arc::new(MemoryKeyValueStore::new()))
    }

    fn planned(start: i64, stop: i64) -> Event {
        Event {
            event_type: EventType::Focus,
            name: "Deep work".to_string(),
            start_time: start,
            stop_time: stop,
            timer_start_time: 0,
            timer_stop_time: 0,
            rating_change: 0.0,
            rating_algorithm: String::new(),
            immutable: false,
            description: String::new(),
            music_url: None,
        }
    }

    #[tokio::test]
    async fn test_put_and_get_event() {
        let events = store();
        let event = planned(NOW + 3600, NOW + 5400);
        events.put_event("alice", &event, NOW).await.unwrap();

        let fetched = events.get_event("alice", &event.id()).await.unwrap();
        assert_eq!(fetched, Some(event));
        assert!(events.get_event("bob", &(NOW + 3600).to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_refuses_live_event() {
        let events = store();
        let event = planned(NOW + 3600, NOW + 5400);
        events.put_event("alice", &event, NOW).await.unwrap();

        // Stop time still ahead: cannot overwrite
        let result = events.put_event("alice", &event, NOW).await;
        assert_eq!(result, Err(StoreError::PreconditionFailed));

        // Once the planned window has passed, a non-immutable record may be replaced
        let result = events.put_event("alice", &event, NOW + 6000).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_put_refuses_immutable_event() {
        let events = store();
        let event = planned(NOW - 7200, NOW - 3600);
        events.put_event("alice", &event, NOW).await.unwrap();
        events
            .update_event_timer(
                "alice",
                &event.id(),
                &EventTimer {
                    timer_start_time: NOW - 7200,
                    timer_stop_time: NOW - 3600,
                    rating_change: 42.0,
                    rating_algorithm: "v0.0.1-2m0s".to_string(),
                    immutable: true,
                },
                0,
            )
            .await
            .unwrap();

        let result = events.put_event("alice", &event, NOW).await;
        assert_eq!(result, Err(StoreError::PreconditionFailed));
    }

    #[tokio::test]
    async fn test_list_events_window() {
        let events = store();
        for offset in [0, 100, 200, 300] {
            events
                .put_event("alice", &planned(NOW + offset, NOW + offset + 50), NOW)
                .await
                .unwrap();
        }

        let listed = events.list_events("alice", NOW + 100, NOW + 200).await.unwrap();
        let starts: Vec<i64> = listed.iter().map(|e| e.start_time).collect();
        assert_eq!(starts, vec![NOW + 100, NOW + 200]);
    }

    #[tokio::test]
    async fn test_list_orders_by_time_not_digits() {
        let events = store();
        events.put_event("alice", &planned(999, 1000), NOW).await.unwrap();
        events.put_event("alice", &planned(10_000, 10_001), NOW).await.unwrap();

        let listed = events.list_events("alice", 0, 20_000).await.unwrap();
        let starts: Vec<i64> = listed.iter().map(|e| e.start_time).collect();
        assert_eq!(starts, vec![999, 10_000]);
    }

    #[tokio::test]
    async fn test_list_spans_digit_count_change() {
        let events = store();
        events
            .put_event("alice", &planned(999_999_999_999, 1_000_000_000_000), NOW)
            .await
            .unwrap();
        events
            .put_event("alice", &planned(1_000_000_000_001, 1_000_000_000_002), NOW)
            .await
            .unwrap();

        let listed = events.list_events("alice", 0, 2_000_000_000_000).await.unwrap();
        let starts: Vec<i64> = listed.iter().map(|e| e.start_time).collect();
        assert_eq!(starts, vec![999_999_999_999, 1_000_000_000_001]);

        let late = events
            .list_events("alice", 1_000_000_000_000, 2_000_000_000_000)
            .await
            .unwrap();
        assert_eq!(late.len(), 1);
    }

    #[tokio::test]
    async fn test_put_refuses_running_event_past_its_stop() {
        let events = store();
        let event = planned(NOW - 3600, NOW - 1800);
        events.put_event("alice", &event, NOW - 7200).await.unwrap();
        events
            .update_event_timer(
                "alice",
                &event.id(),
                &EventTimer {
                    timer_start_time: NOW - 3600,
                    timer_stop_time: 0,
                    rating_change: 0.0,
                    rating_algorithm: String::new(),
                    immutable: false,
                },
                0,
            )
            .await
            .unwrap();

        // Planned stop has passed but the timer is still running
        let result = events.put_event("alice", &planned(NOW - 3600, NOW + 600), NOW).await;
        assert_eq!(result, Err(StoreError::PreconditionFailed));

        let stored = events.get_event("alice", &event.id()).await.unwrap().unwrap();
        assert_eq!(stored.timer_start_time, NOW - 3600);
        assert_eq!(stored.stop_time, NOW - 1800);
    }

    #[tokio::test]
    async fn test_put_events_keeps_colliding_superseded_ids() {
        let events = store();
        let old = planned(NOW - 500, NOW - 400);
        events.put_event("alice", &old, NOW).await.unwrap();

        let moved = planned(NOW + 100, NOW + 200);
        let kept = planned(NOW + 300, NOW + 400);
        events
            .put_events(
                "alice",
                &[moved.clone(), kept.clone()],
                &[old.id(), kept.id()],
                NOW,
            )
            .await
            .unwrap();

        assert!(events.get_event("alice", &old.id()).await.unwrap().is_none());
        assert_eq!(events.get_event("alice", &moved.id()).await.unwrap(), Some(moved));
        assert_eq!(events.get_event("alice", &kept.id()).await.unwrap(), Some(kept));
    }

    #[tokio::test]
    async fn test_timer_update_guards() {
        let events = store();
        let event = planned(NOW, NOW + 1800);
        events.put_event("alice", &event, NOW - 10).await.unwrap();

        let start = EventTimer {
            timer_start_time: NOW + 5,
            timer_stop_time: 0,
            rating_change: 0.0,
            rating_algorithm: String::new(),
            immutable: false,
        };
        events
            .update_event_timer("alice", &event.id(), &start, 0)
            .await
            .unwrap();

        // A second start observed the planned state too late
        let again = events.update_event_timer("alice", &event.id(), &start, 0).await;
        assert_eq!(again, Err(StoreError::PreconditionFailed));

        // Missing events fail the guard rather than being created
        let missing = events.update_event_timer("alice", "42", &start, 0).await;
        assert_eq!(missing, Err(StoreError::PreconditionFailed));
        assert!(events.get_event("alice", "42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_event_id() {
        let events = store();
        let result = events.get_event("alice", "not-a-number").await;
        assert!(matches!(result, Err(StoreError::InvalidArgument(_))));
    }
}
