/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Database connection pool management using diesel and r2d2.
//!
//! The broker persists everything in a single sqlite file. Connections are
//! handed out by an r2d2 pool whose customizer applies the pragmas every
//! connection needs: `foreign_keys` for working cascade deletes, WAL so
//! readers proceed while a writer holds the file, and a busy timeout so
//! short-lived writer contention is waited out instead of surfaced.

use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::SqliteConnection;

/// Pragmas applied to every pooled connection on acquire.
#[derive(Debug)]
struct ConnectionPragmas;

impl diesel::r2d2::CustomizeConnection<SqliteConnection, diesel::r2d2::Error>
    for ConnectionPragmas
{
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(
            "PRAGMA foreign_keys = ON; \
             PRAGMA journal_mode = WAL; \
             PRAGMA synchronous = NORMAL; \
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Represents a pool of sqlite database connections.
#[derive(Clone)]
pub struct ConnectionPool {
    /// The actual connection pool.
    pub pool: Pool<ConnectionManager<SqliteConnection>>,
}

/// Creates a shared connection pool for the broker's sqlite database.
///
/// # Arguments
///
/// * `database_path` - Filesystem path of the database file (created when absent)
/// * `max_size` - The maximum number of connections the pool should maintain
///
/// # Returns
///
/// Returns a `ConnectionPool` instance containing the created connection pool.
///
/// # Panics
///
/// This function will panic if the connection pool creation fails.
pub fn create_shared_connection_pool(database_path: &str, max_size: u32) -> ConnectionPool {
    let manager = ConnectionManager::<SqliteConnection>::new(database_path);

    let pool = Pool::builder()
        .max_size(max_size)
        .connection_customizer(Box::new(ConnectionPragmas))
        .build(manager)
        .expect("Failed to create connection pool");

    ConnectionPool { pool }
}

impl ConnectionPool {
    /// Gets a connection from the pool.
    ///
    /// # Returns
    ///
    /// Returns a pooled connection ready for use.
    pub fn get(
        &self,
    ) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>, r2d2::Error> {
        self.pool.get()
    }
}
