/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Sessions Module
//!
//! Correlates a stream of work orders originating from one external user on
//! one channel (HTTP, Telegram, …).

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Queryable, Selectable, Identifiable, AsChangeset, Debug, Clone, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = crate::schema::sessions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Session {
    pub id: Uuid,
    pub channel: String,
    pub external_user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = crate::schema::sessions)]
pub struct NewSession {
    pub channel: String,
    pub external_user_id: String,
}

impl NewSession {
    pub fn new(channel: String, external_user_id: String) -> Result<Self, String> {
        if channel.trim().is_empty() {
            return Err("channel cannot be empty".to_string());
        }
        if external_user_id.trim().is_empty() {
            return Err("external_user_id cannot be empty".to_string());
        }
        Ok(NewSession {
            channel,
            external_user_id,
        })
    }
}
