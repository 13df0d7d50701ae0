/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Queue
//!
//! An in-process, append-only stream with consumer groups, giving
//! at-least-once delivery. This is the only cross-process synchronisation
//! primitive the design calls for; since the whole scheduler runs as one
//! process here, it is a `Mutex`-guarded in-memory structure rather than an
//! external broker, supporting consumer groups, claims, and delayed
//! redelivery.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration as StdDuration;
use uuid::Uuid;

use wos_utils::logging::prelude::*;

use crate::error::{Result, SchedulerError};

/// A message handed to a consumer. `delivery_count` lets consumers detect
/// poison pills.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub entry_id: Uuid,
    pub work_order_id: Uuid,
    pub payload: JsonValue,
    pub delivery_count: u32,
}

struct Entry {
    work_order_id: Uuid,
    payload: JsonValue,
    delivery_count: u32,
}

struct Claim {
    consumer: String,
    claimed_at: DateTime<Utc>,
}

#[derive(Default)]
struct GroupState {
    ready: VecDeque<Uuid>,
    delayed: Vec<(DateTime<Utc>, Uuid)>,
    pending: HashMap<Uuid, Claim>,
}

struct Inner {
    entries: HashMap<Uuid, Entry>,
    groups: HashMap<String, GroupState>,
}

/// In-process queue. Cloning shares the same underlying state.
#[derive(Clone)]
pub struct Queue {
    inner: std::sync::Arc<Mutex<Inner>>,
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl Queue {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                groups: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a consumer group if it doesn't already exist. Idempotent.
    /// A group created after messages were enqueued only sees messages
    /// enqueued from this point forward (no backlog replay).
    pub fn ensure_group(&self, group: &str) {
        let mut inner = self.lock();
        inner.groups.entry(group.to_string()).or_default();
    }

    /// Appends a new message to every registered consumer group.
    pub fn enqueue(&self, work_order_id: Uuid, payload: JsonValue) -> Uuid {
        let entry_id = Uuid::new_v4();
        let mut inner = self.lock();
        inner.entries.insert(
            entry_id,
            Entry {
                work_order_id,
                payload,
                delivery_count: 0,
            },
        );
        for group in inner.groups.values_mut() {
            group.ready.push_back(entry_id);
        }
        entry_id
    }

    /// Consumes up to `max_count` messages for `group`, blocking (via short
    /// polling sleeps) up to `block_timeout` if nothing is immediately
    /// available. Delivery order within a group is producer order per the
    /// stream.
    pub async fn consume(
        &self,
        group: &str,
        consumer: &str,
        max_count: usize,
        block_timeout: StdDuration,
    ) -> Result<Vec<QueueMessage>> {
        let deadline = tokio::time::Instant::now() + block_timeout;
        loop {
            let messages = self.try_consume(group, consumer, max_count)?;
            if !messages.is_empty() || tokio::time::Instant::now() >= deadline {
                return Ok(messages);
            }
            tokio::time::sleep(StdDuration::from_millis(25)).await;
        }
    }

    fn try_consume(&self, group: &str, consumer: &str, max_count: usize) -> Result<Vec<QueueMessage>> {
        let mut inner = self.lock();
        let now = Utc::now();

        let group_state = inner
            .groups
            .entry(group.to_string())
            .or_default();

        let mut become_ready = Vec::new();
        group_state.delayed.retain(|(available_at, entry_id)| {
            if *available_at <= now {
                become_ready.push(*entry_id);
                false
            } else {
                true
            }
        });
        for entry_id in become_ready {
            group_state.ready.push_front(entry_id);
        }

        let mut claimed_ids = Vec::with_capacity(max_count.min(group_state.ready.len()));
        while claimed_ids.len() < max_count {
            match group_state.ready.pop_front() {
                Some(entry_id) => claimed_ids.push(entry_id),
                None => break,
            }
        }

        let mut out = Vec::with_capacity(claimed_ids.len());
        for entry_id in claimed_ids {
            let entry = inner
                .entries
                .get_mut(&entry_id)
                .ok_or_else(|| SchedulerError::QueueUnavailable("dangling entry".to_string()))?;
            entry.delivery_count += 1;
            let group_state = inner.groups.get_mut(group).expect("group just used above");
            group_state.pending.insert(
                entry_id,
                Claim {
                    consumer: consumer.to_string(),
                    claimed_at: now,
                },
            );
            out.push(QueueMessage {
                entry_id,
                work_order_id: entry.work_order_id,
                payload: entry.payload.clone(),
                delivery_count: entry.delivery_count,
            });
        }
        Ok(out)
    }

    /// Acknowledges a delivered message. Idempotent: acking an entry not
    /// currently pending for `group` is a no-op.
    pub fn ack(&self, group: &str, entry_id: Uuid) {
        let mut inner = self.lock();
        if let Some(group_state) = inner.groups.get_mut(group) {
            group_state.pending.remove(&entry_id);
        }
    }

    /// Schedules the same entry for redelivery to `group` after `delay`,
    /// removing it from the pending set first. Used for retry-with-backoff
    /// instead of minting a brand new entry, so
    /// `delivery_count` keeps accumulating on the one logical message.
    pub fn requeue_with_delay(&self, group: &str, entry_id: Uuid, delay: StdDuration) -> Result<()> {
        let mut inner = self.lock();
        let group_state = inner
            .groups
            .get_mut(group)
            .ok_or_else(|| SchedulerError::QueueUnavailable(format!("unknown group {group}")))?;
        group_state.pending.remove(&entry_id);
        let available_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));
        group_state.delayed.push((available_at, entry_id));
        Ok(())
    }

    /// Reassigns messages whose claim has been held longer than
    /// `idle_threshold`, as if freshly delivered to `consumer`.
    pub fn claim_stale(
        &self,
        group: &str,
        idle_threshold: StdDuration,
        consumer: &str,
    ) -> Result<Vec<QueueMessage>> {
        let mut inner = self.lock();
        let now = Utc::now();
        let threshold = chrono::Duration::from_std(idle_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let stale_ids: Vec<Uuid> = {
            let group_state = inner
                .groups
                .get(group)
                .ok_or_else(|| SchedulerError::QueueUnavailable(format!("unknown group {group}")))?;
            group_state
                .pending
                .iter()
                .filter(|(_, claim)| now - claim.claimed_at > threshold)
                .map(|(id, _)| *id)
                .collect()
        };

        let mut out = Vec::with_capacity(stale_ids.len());
        for entry_id in &stale_ids {
            let entry = match inner.entries.get_mut(entry_id) {
                Some(e) => e,
                None => continue,
            };
            entry.delivery_count += 1;
            let snapshot = QueueMessage {
                entry_id: *entry_id,
                work_order_id: entry.work_order_id,
                payload: entry.payload.clone(),
                delivery_count: entry.delivery_count,
            };
            let group_state = inner.groups.get_mut(group).expect("checked above");
            group_state.pending.insert(
                *entry_id,
                Claim {
                    consumer: consumer.to_string(),
                    claimed_at: now,
                },
            );
            out.push(snapshot);
        }

        if !out.is_empty() {
            warn!(
                "reclaimed {} stale message(s) for group {} (idle > {:?})",
                out.len(),
                group,
                idle_threshold
            );
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn enqueue_then_consume_delivers_once() {
        let q = Queue::new();
        q.ensure_group("dispatcher");
        let wo_id = Uuid::new_v4();
        q.enqueue(wo_id, json!({"hello": "world"}));

        let msgs = q
            .consume("dispatcher", "worker-1", 10, StdDuration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].work_order_id, wo_id);
        assert_eq!(msgs[0].delivery_count, 1);

        let again = q
            .consume("dispatcher", "worker-1", 10, StdDuration::from_millis(50))
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn ack_is_idempotent() {
        let q = Queue::new();
        q.ensure_group("dispatcher");
        let wo_id = Uuid::new_v4();
        q.enqueue(wo_id, json!({}));
        let msgs = q
            .consume("dispatcher", "w1", 1, StdDuration::from_millis(50))
            .await
            .unwrap();
        let entry_id = msgs[0].entry_id;
        q.ack("dispatcher", entry_id);
        q.ack("dispatcher", entry_id);
    }

    #[tokio::test]
    async fn requeue_with_delay_redelivers_after_window() {
        let q = Queue::new();
        q.ensure_group("dispatcher");
        let wo_id = Uuid::new_v4();
        q.enqueue(wo_id, json!({}));
        let msgs = q
            .consume("dispatcher", "w1", 1, StdDuration::from_millis(50))
            .await
            .unwrap();
        let entry_id = msgs[0].entry_id;

        q.requeue_with_delay("dispatcher", entry_id, StdDuration::from_millis(10))
            .unwrap();

        let immediate = q
            .consume("dispatcher", "w1", 1, StdDuration::from_millis(0))
            .await
            .unwrap();
        assert!(immediate.is_empty());

        tokio::time::sleep(StdDuration::from_millis(30)).await;
        let redelivered = q
            .consume("dispatcher", "w1", 1, StdDuration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].delivery_count, 2);
    }

    #[tokio::test]
    async fn claim_stale_reclaims_crashed_consumer_messages() {
        let q = Queue::new();
        q.ensure_group("dispatcher");
        let wo_id = Uuid::new_v4();
        q.enqueue(wo_id, json!({}));
        let msgs = q
            .consume("dispatcher", "crashed", 1, StdDuration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(msgs.len(), 1);

        let reclaimed = q
            .claim_stale("dispatcher", StdDuration::from_millis(0), "recoverer")
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].delivery_count, 2);
    }
}
