//! Database utilities.

use std::env;

use anyhow::Context;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::ConnectionManager;

use crate::Result;

/// A pool of PostgreSQL connections.
pub type Pool = diesel::r2d2::Pool<ConnectionManager<PgConnection>>;

/// A single PostgreSQL connection checked out of a [`Pool`].
pub type PooledConnection = diesel::r2d2::PooledConnection<ConnectionManager<PgConnection>>;

/// Get the database URL. The store itself is owned and managed by the grid
/// infrastructure; we only ever get told where it lives.
pub fn database_url() -> Result<String> {
    env::var("DATABASE_URL").context("DATABASE_URL must be set to the job database")
}

/// Build a connection pool holding up to `max_size` connections.
pub fn pool(max_size: u32) -> Result<Pool> {
    let manager = ConnectionManager::new(database_url()?);
    Pool::builder()
        .max_size(max_size)
        .build(manager)
        .context("could not create database connection pool")
}

/// Connect to PostgreSQL directly, without pooling.
pub fn connect() -> Result<PgConnection> {
    let database_url = database_url()?;
    PgConnection::establish(&database_url)
        .with_context(|| format!("error connecting to {}", database_url))
}
