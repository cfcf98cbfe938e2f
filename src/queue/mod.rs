//! At-least-once message queue carrying rating updates.
//!
//! Messages are leased rather than removed on receipt: a received message is
//! hidden for a visibility timeout and comes back if it is not acked in time.
//! Consumers must therefore be idempotent.

pub mod channel;
pub mod firestore;
pub mod memory;

pub use channel::RatingChannel;
pub use firestore::FirestoreQueue;
pub use memory::MemoryQueue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::StoreError;

/// One leased message.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message_id: String,
    pub body: String,
    /// Opaque handle for [`MessageQueue::ack`], valid for this delivery only
    pub receipt: String,
    /// The message becomes visible again after this instant unless acked
    pub visible_until: DateTime<Utc>,
    /// How many times the message has been delivered, this delivery included
    pub receive_count: u32,
}

/// Batched, visibility-timeout based queue.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Enqueue a message body; returns the message id.
    async fn send(&self, body: String) -> Result<String, StoreError>;

    /// Lease up to `max` visible messages.
    ///
    /// Waits at most `wait_window` for the first message and returns an empty
    /// batch if none shows up. Leased messages stay hidden for `visibility_timeout`.
    async fn receive_batch(
        &self,
        max: usize,
        wait_window: Duration,
        visibility_timeout: Duration,
    ) -> Result<Vec<Delivery>, StoreError>;

    /// Remove a delivered message.
    ///
    /// Fails with `NotFound` if the receipt is stale: the message was already
    /// acked or has been delivered again since.
    async fn ack(&self, receipt: &str) -> Result<(), StoreError>;
}

static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique message id derived from the clock, a process counter and the body.
pub(crate) fn new_message_id(body: &str) -> String {
    use sha2::{Digest, Sha256};

    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let counter = MESSAGE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let digest = Sha256::digest(format!("{}:{}:{}", nanos, counter, body));
    hex::encode(&digest[..16])
}

/// Receipt handle for the `receive_count`-th delivery of a message.
pub(crate) fn receipt_for(message_id: &str, receive_count: u32) -> String {
    format!("{}:{}", message_id, receive_count)
}

/// Message id a receipt refers to.
pub(crate) fn receipt_message_id(receipt: &str) -> Result<&str, StoreError> {
    receipt
        .rsplit_once(':')
        .map(|(id, _)| id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| StoreError::InvalidArgument(format!("malformed receipt '{}'", receipt)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_ids_are_unique() {
        let a = new_message_id("{}");
        let b = new_message_id("{}");
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_receipt_round_trip() {
        let receipt = receipt_for("abc123", 2);
        assert_eq!(receipt, "abc123:2");
        assert_eq!(receipt_message_id(&receipt).unwrap(), "abc123");
        assert!(receipt_message_id("no-separator").is_err());
    }
}
