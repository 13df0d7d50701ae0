/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # wos-models
//!
//! Data structures and the Diesel schema for the tiered work-order scheduler.
//! This crate owns no business logic: it declares the shape of the durable
//! state (`work_orders`, `audit_logs`, `agent_metrics`, `sessions`, `qa_specs`)
//! and the validation rules each row must satisfy on construction.

use diesel::pg::PgConnection;
use diesel::prelude::*;

pub mod models;
pub mod schema;

#[allow(dead_code)]
/// Establishes a one-off connection to the PostgreSQL database.
///
/// Exists for migrations and in-crate tests; the running service goes through
/// the pooled connection in `wos-core::db` instead.
pub(crate) fn establish_connection(database_url: String) -> PgConnection {
    PgConnection::establish(&database_url)
        .unwrap_or_else(|_| panic!("Error connecting to {}", database_url))
}
