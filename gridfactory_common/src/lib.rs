//! Code shared between the gridfactory DB gateway tools.

#![warn(missing_docs)]

pub mod config;
pub mod db;
pub mod errors;
pub mod format;
pub mod query;
pub mod schema;
pub mod tables;
pub mod tracing_support;
pub mod update;

/// Common imports used by many modules.
pub mod prelude {
    pub use anyhow::{anyhow, Context};
    pub use diesel::pg::PgConnection;
    pub use tracing::{debug, error, info, trace, warn};

    pub use crate::config::GatewayConfig;
    pub use crate::errors::{GatewayError, GatewayResult};
    pub use crate::schema::{Record, SchemaCache, TableSchema};
    pub use crate::tables::{IdentifierMatch, Table};
    pub use crate::{Error, Result};
}

/// Error type for this crate's functions.
pub type Error = anyhow::Error;

/// Result type for this crate's functions.
pub type Result<T> = std::result::Result<T, Error>;

/// Return this crate's version, which doubles as the gateway's advertised
/// version.
pub fn gridfactory_common_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
