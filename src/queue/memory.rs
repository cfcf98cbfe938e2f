//! Process-local queue backend.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{new_message_id, receipt_for, Delivery, MessageQueue};
use crate::error::StoreError;

#[derive(Debug)]
struct Message {
    id: String,
    body: String,
    visible_at: Instant,
    receipt: Option<String>,
    receive_count: u32,
}

/// In-memory [`MessageQueue`] with visibility timeouts.
pub struct MemoryQueue {
    messages: Mutex<Vec<Message>>,
    arrivals: Notify,
    max_receives: u32,
}

impl MemoryQueue {
    /// Messages delivered `max_receives` times without an ack are dropped.
    pub fn new(max_receives: u32) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            arrivals: Notify::new(),
            max_receives: max_receives.max(1),
        }
    }

    /// Messages not yet acked, leased ones included.
    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn send(&self, body: String) -> Result<String, StoreError> {
        let id = new_message_id(&body);
        self.messages.lock().await.push(Message {
            id: id.clone(),
            body,
            visible_at: Instant::now(),
            receipt: None,
            receive_count: 0,
        });
        self.arrivals.notify_waiters();
        Ok(id)
    }

    async fn receive_batch(
        &self,
        max: usize,
        wait_window: Duration,
        visibility_timeout: Duration,
    ) -> Result<Vec<Delivery>, StoreError> {
        let deadline = Instant::now() + wait_window;

        loop {
            // Register for arrivals before looking so a send in between is not missed.
            let arrival = self.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            let now = Instant::now();
            let mut next_visible = deadline;
            let mut batch = Vec::new();
            {
                let mut messages = self.messages.lock().await;
                let max_receives = self.max_receives;
                messages.retain(|message| {
                    let poisoned = message.visible_at <= now && message.receive_count >= max_receives;
                    if poisoned {
                        tracing::error!(
                            message_id = %message.id,
                            receive_count = message.receive_count,
                            "Dropping message after too many deliveries"
                        );
                    }
                    !poisoned
                });

                for message in messages.iter_mut() {
                    if message.visible_at > now {
                        next_visible = next_visible.min(message.visible_at);
                        continue;
                    }
                    if batch.len() >= max {
                        break;
                    }
                    message.receive_count += 1;
                    message.visible_at = now + visibility_timeout;
                    let receipt = receipt_for(&message.id, message.receive_count);
                    message.receipt = Some(receipt.clone());
                    batch.push(Delivery {
                        message_id: message.id.clone(),
                        body: message.body.clone(),
                        receipt,
                        visible_until: Utc::now()
                            + chrono::Duration::from_std(visibility_timeout)
                                .unwrap_or_else(|_| chrono::Duration::zero()),
                        receive_count: message.receive_count,
                    });
                }
            }

            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }

            tokio::select! {
                _ = &mut arrival => {}
                _ = tokio::time::sleep_until(next_visible) => {}
            }
        }
    }

    async fn ack(&self, receipt: &str) -> Result<(), StoreError> {
        let mut messages = self.messages.lock().await;
        let position = messages
            .iter()
            .position(|message| message.receipt.as_deref() == Some(receipt))
            .ok_or(StoreError::NotFound)?;
        messages.remove(position);
        Ok(())
    }
}
