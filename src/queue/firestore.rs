// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore-backed queue.
//!
//! Each message is a document in `rating_updates`. Receiving leases a
//! document by moving its `visible_at` forward inside a transaction, so two
//! consumers can never hold the same delivery.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{new_message_id, receipt_for, receipt_message_id, Delivery, MessageQueue};
use crate::db::collections;
use crate::db::firestore::{abandon, commit, transport, Attempt};
use crate::db::FirestoreDb;
use crate::error::StoreError;
use firestore::FirestoreQueryDirection;
use futures_util::future::try_join_all;

/// Delay between polls while waiting for messages.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Stored shape of a queued message.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueuedMessage {
    message_id: String,
    body: String,
    /// Unix milliseconds from which the message may be received
    visible_at: i64,
    #[serde(default)]
    receipt: String,
    #[serde(default)]
    receive_count: u32,
    enqueued_at: i64,
}

/// [`MessageQueue`] stored in Firestore.
#[derive(Clone)]
pub struct FirestoreQueue {
    db: FirestoreDb,
    max_receives: u32,
}

impl FirestoreQueue {
    pub fn new(db: FirestoreDb, max_receives: u32) -> Self {
        Self {
            db,
            max_receives: max_receives.max(1),
        }
    }

    /// Candidates visible at `now_ms`, oldest first.
    async fn visible(&self, now_ms: i64, max: usize) -> Result<Vec<QueuedMessage>, StoreError> {
        self.db
            .get_client()?
            .fluent()
            .select()
            .from(collections::RATING_UPDATES)
            .filter(move |q| q.for_all([q.field("visible_at").less_than_or_equal(now_ms)]))
            .order_by([("visible_at", FirestoreQueryDirection::Ascending)])
            .limit(max as u32)
            .obj()
            .query()
            .await
            .map_err(transport)
    }

    /// Lease one message; `None` if another consumer got there first.
    async fn lease(
        &self,
        message_id: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<Delivery>, StoreError> {
        let (mut transaction, reader) = self.db.begin().await?;
        let staged = async {
            let current: Option<QueuedMessage> = reader
                .fluent()
                .select()
                .by_id_in(collections::RATING_UPDATES)
                .obj()
                .one(message_id)
                .await
                .map_err(transport)?;

            let now_ms = Utc::now().timestamp_millis();
            let Some(mut message) = current.filter(|m| m.visible_at <= now_ms) else {
                return Ok(Staged::Taken);
            };

            let client = self.db.get_client()?;
            if message.receive_count >= self.max_receives {
                tracing::error!(
                    message_id,
                    receive_count = message.receive_count,
                    "Dropping message after too many deliveries"
                );
                client
                    .fluent()
                    .delete()
                    .from(collections::RATING_UPDATES)
                    .document_id(message_id)
                    .add_to_transaction(&mut transaction)
                    .map_err(transport)?;
                return Ok(Staged::Dropped);
            }

            message.receive_count += 1;
            message.visible_at = now_ms + visibility_timeout.as_millis() as i64;
            message.receipt = receipt_for(&message.message_id, message.receive_count);

            client
                .fluent()
                .update()
                .in_col(collections::RATING_UPDATES)
                .document_id(message_id)
                .object(&message)
                .add_to_transaction(&mut transaction)
                .map_err(transport)?;
            Ok::<_, StoreError>(Staged::Leased(message))
        }
        .await;

        let message = match staged {
            Ok(Staged::Leased(message)) => message,
            Ok(Staged::Taken) => {
                abandon(transaction).await;
                return Ok(None);
            }
            Ok(Staged::Dropped) => {
                if let Attempt::Contended(e) = commit(transaction, ()).await? {
                    tracing::debug!(message_id, error = %e, "Poison message delete contended");
                }
                return Ok(None);
            }
            Err(e) => {
                abandon(transaction).await;
                return Err(e);
            }
        };

        let message = match commit(transaction, message).await? {
            Attempt::Done(message) => message,
            Attempt::Contended(e) => {
                tracing::debug!(message_id, error = %e, "Lease lost to another consumer");
                return Ok(None);
            }
        };

        Ok(Some(Delivery {
            message_id: message.message_id,
            body: message.body,
            receipt: message.receipt,
            visible_until: Utc
                .timestamp_millis_opt(message.visible_at)
                .single()
                .unwrap_or_default(),
            receive_count: message.receive_count,
        }))
    }
}

/// What a lease transaction staged.
enum Staged {
    /// Missing or still invisible
    Taken,
    /// Delivered too often; staged for deletion
    Dropped,
    Leased(QueuedMessage),
}

#[async_trait]
impl MessageQueue for FirestoreQueue {
    async fn send(&self, body: String) -> Result<String, StoreError> {
        let now_ms = Utc::now().timestamp_millis();
        let message = QueuedMessage {
            message_id: new_message_id(&body),
            body,
            visible_at: now_ms,
            receipt: String::new(),
            receive_count: 0,
            enqueued_at: now_ms,
        };

        let _: () = self
            .db
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::RATING_UPDATES)
            .document_id(&message.message_id)
            .object(&message)
            .execute()
            .await
            .map_err(transport)?;

        Ok(message.message_id)
    }

    async fn receive_batch(
        &self,
        max: usize,
        wait_window: Duration,
        visibility_timeout: Duration,
    ) -> Result<Vec<Delivery>, StoreError> {
        let deadline = tokio::time::Instant::now() + wait_window;

        loop {
            let candidates = self.visible(Utc::now().timestamp_millis(), max).await?;
            let leases = candidates
                .iter()
                .map(|candidate| self.lease(&candidate.message_id, visibility_timeout));
            let batch: Vec<Delivery> = try_join_all(leases).await?.into_iter().flatten().collect();

            let now = tokio::time::Instant::now();
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn ack(&self, receipt: &str) -> Result<(), StoreError> {
        let message_id = receipt_message_id(receipt)?;
        let (mut transaction, reader) = self.db.begin().await?;
        let staged = async {
            let current: Option<QueuedMessage> = reader
                .fluent()
                .select()
                .by_id_in(collections::RATING_UPDATES)
                .obj()
                .one(message_id)
                .await
                .map_err(transport)?;

            if current.map(|m| m.receipt) != Some(receipt.to_string()) {
                return Err(StoreError::NotFound);
            }

            self.db
                .get_client()?
                .fluent()
                .delete()
                .from(collections::RATING_UPDATES)
                .document_id(message_id)
                .add_to_transaction(&mut transaction)
                .map_err(transport)?;
            Ok(())
        }
        .await;
        if let Err(e) = staged {
            abandon(transaction).await;
            return Err(e);
        }

        // A contended commit means the message was leased again meanwhile.
        match commit(transaction, ()).await? {
            Attempt::Done(()) => Ok(()),
            Attempt::Contended(e) => {
                tracing::debug!(message_id, error = %e, "Ack commit contended");
                Err(StoreError::NotFound)
            }
        }
    }
}
