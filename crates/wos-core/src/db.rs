/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Database connection pool management using diesel and r2d2.
//!
//! This is the primary backend's connection layer. It is deliberately
//! thin: the pool is handed to `store::postgres::PostgresStore`, which owns
//! every query. Nothing outside `store` touches the pool directly.

use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;

/// A pool of PostgreSQL connections backing the primary store.
#[derive(Clone)]
pub struct ConnectionPool {
    pub pool: Pool<ConnectionManager<PgConnection>>,
}

/// Builds a connection pool for the given database URL.
///
/// # Panics
///
/// Panics if the pool cannot be constructed. Only used in contexts (tests,
/// migrations) where the primary backend is known to be present; the
/// running service goes through `try_create_connection_pool` so an
/// unreachable primary falls back instead of panicking.
pub fn create_connection_pool(database_url: &str, max_size: u32) -> ConnectionPool {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(max_size)
        .build(manager)
        .expect("failed to build postgres connection pool");
    ConnectionPool { pool }
}

/// Attempts to open the primary backend, returning `None` on any failure so
/// the caller can fall back to the embedded backend instead of panicking.
pub fn try_create_connection_pool(database_url: &str, max_size: u32) -> Option<ConnectionPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder().max_size(max_size).build(manager).ok()?;
    // `build` alone does not prove connectivity with some managers; force a
    // checkout so an unreachable server is detected at startup, not on the
    // first request.
    pool.get().ok()?;
    Some(ConnectionPool { pool })
}
