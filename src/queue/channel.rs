//! Typed rating update channel between the timing service and the aggregator.

use std::sync::Arc;
use std::time::Duration;

use super::{Delivery, MessageQueue};
use crate::config::LeaderboardConfig;
use crate::error::{AppError, StoreError};
use crate::models::RatingUpdate;

/// Sends and receives [`RatingUpdate`] envelopes as JSON messages.
#[derive(Clone)]
pub struct RatingChannel {
    queue: Arc<dyn MessageQueue>,
    batch_size: usize,
    wait_window: Duration,
    visibility_timeout: Duration,
}

impl RatingChannel {
    pub fn new(queue: Arc<dyn MessageQueue>, config: &LeaderboardConfig) -> Self {
        Self {
            queue,
            batch_size: config.batch_size,
            wait_window: config.wait_window,
            visibility_timeout: config.visibility_timeout,
        }
    }

    /// Enqueue one envelope.
    pub async fn send_update(&self, update: &RatingUpdate) -> Result<(), StoreError> {
        let body =
            serde_json::to_string(update).map_err(|e| StoreError::InvalidArgument(e.to_string()))?;
        let message_id = self.queue.send(body).await?;
        tracing::debug!(
            message_id = %message_id,
            user_id = %update.user_id,
            time = update.time,
            "Rating update enqueued"
        );
        Ok(())
    }

    /// Lease the next batch, waiting up to the configured window.
    pub async fn read_updates(&self) -> Result<Vec<Delivery>, StoreError> {
        self.queue
            .receive_batch(self.batch_size, self.wait_window, self.visibility_timeout)
            .await
    }

    /// Decode a delivered envelope.
    pub fn parse(delivery: &Delivery) -> Result<RatingUpdate, AppError> {
        serde_json::from_str(&delivery.body).map_err(|e| {
            AppError::InvalidArgument(format!(
                "malformed rating update {}: {}",
                delivery.message_id, e
            ))
        })
    }

    /// Acknowledge a processed delivery.
    ///
    /// A stale receipt means the message is already being redelivered; the
    /// board merge is idempotent, so this is only worth a warning.
    pub async fn delete_update(&self, delivery: &Delivery) -> Result<(), StoreError> {
        match self.queue.ack(&delivery.receipt).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound) => {
                tracing::warn!(
                    message_id = %delivery.message_id,
                    receive_count = delivery.receive_count,
                    "Ack after visibility timeout; message will be merged again"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
