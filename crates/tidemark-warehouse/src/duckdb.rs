//! `DuckDB` connection pool management.
//!
//! Every pooled connection is cloned from a single root connection so that all
//! workers share one database instance. A [`PooledConnection`] goes back to the
//! idle list when it is dropped, whatever path the caller leaves by.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ::duckdb::Connection;

use crate::WarehouseError;

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    /// A database file on disk.
    File(PathBuf),
    /// A private in-memory database, shared by every connection of one pool.
    Memory,
}

struct PoolInner {
    location: DbLocation,
    max_idle: usize,
    root: Mutex<Connection>,
    idle: Mutex<Vec<Connection>>,
}

/// A connection pool manager for `DuckDB` connections.
#[derive(Clone)]
pub struct DuckDbConnectionManager {
    inner: Arc<PoolInner>,
}

impl DuckDbConnectionManager {
    /// Open the database and create a pool around it.
    ///
    /// # Arguments
    /// * `location` - Database file or in-memory database
    /// * `max_idle` - Maximum number of idle connections kept for reuse
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or configured.
    pub fn open(location: DbLocation, max_idle: usize) -> Result<Self, WarehouseError> {
        let root = match &location {
            DbLocation::File(path) => Connection::open(path)?,
            DbLocation::Memory => Connection::open_in_memory()?,
        };
        configure_connection(&root)?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                location,
                max_idle: max_idle.max(1),
                root: Mutex::new(root),
                idle: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Acquire a connection from the pool, opening a new one when none is idle.
    ///
    /// # Errors
    /// Returns an error if a new connection cannot be cloned from the root
    /// connection or if a pool lock was poisoned by a panicking holder.
    pub fn acquire(&self) -> Result<PooledConnection, WarehouseError> {
        let reused = self
            .inner
            .idle
            .lock()
            .map_err(|_| WarehouseError::PoolPoisoned)?
            .pop();

        let connection = match reused {
            Some(connection) => connection,
            None => {
                let root = self
                    .inner
                    .root
                    .lock()
                    .map_err(|_| WarehouseError::PoolPoisoned)?;
                let connection = root.try_clone()?;
                configure_connection(&connection)?;
                connection
            }
        };

        Ok(PooledConnection {
            pool: Arc::clone(&self.inner),
            connection: Some(connection),
        })
    }

    /// Get the path to the database file, if the database is on disk.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        match &self.inner.location {
            DbLocation::File(path) => Some(path.as_path()),
            DbLocation::Memory => None,
        }
    }

    /// Number of connections currently idle in the pool.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}

/// A pooled connection that returns to the pool when dropped.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    connection: Option<Connection>,
}

impl PooledConnection {
    fn connection(&self) -> &Connection {
        match self.connection.as_ref() {
            Some(connection) => connection,
            // Only `Drop` takes the connection out.
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        if let Ok(mut idle) = self.pool.idle.lock() {
            if idle.len() < self.pool.max_idle {
                idle.push(connection);
            }
        }
    }
}

/// Configure a database connection with appropriate settings.
fn configure_connection(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch("PRAGMA disable_progress_bar;")
}
