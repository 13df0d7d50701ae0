/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Sliding-window rate limiter per ingress principal.
//!
//! In-process `Mutex<HashMap>`-guarded state — no external store needed
//! since a rejection never needs to survive a restart.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Per-principal sliding window of recent request timestamps.
pub struct RateLimiter {
    requests: u32,
    window: chrono::Duration,
    state: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new(requests: u32, window_s: i64) -> Self {
        Self {
            requests,
            window: chrono::Duration::seconds(window_s.max(1)),
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Records an attempt for `principal` and returns whether it is allowed
    /// under the sliding window. Rejections never create work orders.
    pub fn check(&self, principal: &str) -> bool {
        let now = Utc::now();
        let cutoff = now - self.window;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let entry = state.entry(principal.to_string()).or_default();

        while let Some(front) = entry.front() {
            if *front < cutoff {
                entry.pop_front();
            } else {
                break;
            }
        }

        if entry.len() as u32 >= self.requests {
            return false;
        }
        entry.push_back(now);
        true
    }
}
