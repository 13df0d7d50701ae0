/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # EventBus
//!
//! In-process pub/sub for progress events. Distinct from the [`Queue`](crate::queue::Queue)'s
//! consumer-group delivery: events here are fire-and-forget fan-out, never
//! persisted, and a subscriber that isn't listening simply misses them —
//! clients recover by polling `GetWorkOrder`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;
use utoipa::ToSchema;

use wos_utils::logging::prelude::*;

/// Default broadcast channel capacity. Slow subscribers that fall this far
/// behind start missing events, which is acceptable.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// One progress notification, published after a successful status
/// transition.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProgressEvent {
    pub work_order_id: Uuid,
    pub status: String,
    pub tier: String,
    pub attempt: i32,
    pub progress: Option<String>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(work_order_id: Uuid, status: &str, tier: &str, attempt: i32) -> Self {
        Self {
            work_order_id,
            status: status.to_string(),
            tier: tier.to_string(),
            attempt,
            progress: None,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Broadcast-backed event bus. Cloning shares the same underlying channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to every current subscriber. Never blocks; if
    /// nobody is listening the event is simply dropped.
    pub fn publish(&self, event: ProgressEvent) {
        let work_order_id = event.work_order_id;
        let status = event.status.clone();
        if let Err(e) = self.sender.send(event) {
            debug!(
                "no subscribers for progress event {} on work order {}: {}",
                status, work_order_id, e
            );
        }
    }

    /// Subscribes to the whole event stream. Callers filter by
    /// `work_order_id`/`session_id` themselves.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let wo_id = Uuid::new_v4();
        bus.publish(ProgressEvent::new(wo_id, "completed", "intern", 0));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.work_order_id, wo_id);
        assert_eq!(received.status, "completed");
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(ProgressEvent::new(Uuid::new_v4(), "queued", "admin", 0));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        let wo_id = Uuid::new_v4();
        bus.publish(ProgressEvent::new(wo_id, "blocked", "ceo", 3));
        assert_eq!(rx1.recv().await.unwrap().work_order_id, wo_id);
        assert_eq!(rx2.recv().await.unwrap().work_order_id, wo_id);
    }
}
