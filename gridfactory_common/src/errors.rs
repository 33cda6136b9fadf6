//! Error-handling code.
//!
//! The gateway's failure modes form a small closed set, so unlike most of our
//! internal plumbing (which just uses `anyhow`), the request path gets a real
//! enum that the server can map onto HTTP statuses.

use std::fmt;

use crate::Error;

/// Result type for gateway operations.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// What went wrong while handling a gateway request.
#[derive(Debug)]
pub enum GatewayError {
    /// We could not discover the column list of a table.
    Schema(Error),
    /// A SELECT, UPDATE or INSERT against the store failed.
    Query(Error),
    /// The request itself was malformed (bad pagination, unknown column).
    BadRequest(String),
    /// The caller is not allowed to perform the requested update.
    Denied(String),
    /// The request named a table or record we don't serve.
    NotFound,
}

impl GatewayError {
    /// Wrap a schema-introspection failure.
    pub fn schema(err: impl Into<Error>) -> Self {
        GatewayError::Schema(err.into())
    }

    /// Wrap a query-execution failure.
    pub fn query(err: impl Into<Error>) -> Self {
        GatewayError::Query(err.into())
    }

    /// Reject a malformed request.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        GatewayError::BadRequest(msg.into())
    }

    /// Decline an unauthorized update. The message is for the log, not the
    /// caller.
    pub fn denied(msg: impl Into<String>) -> Self {
        GatewayError::Denied(msg.into())
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Schema(err) => write!(f, "schema introspection failed: {}", err),
            GatewayError::Query(err) => write!(f, "query execution failed: {}", err),
            GatewayError::BadRequest(msg) => write!(f, "bad request: {}", msg),
            GatewayError::Denied(msg) => write!(f, "declined: {}", msg),
            GatewayError::NotFound => write!(f, "not found"),
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GatewayError::Schema(err) | GatewayError::Query(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

/// Display an error with its complete cause chain, one cause per line.
pub fn display_causes(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = format!("ERROR: {}", err);
    let mut source = err.source();
    while let Some(next) = source {
        out.push_str(&format!("\n  caused by: {}", next));
        source = next.source();
    }
    out
}

#[test]
fn display_causes_walks_the_chain() {
    use anyhow::anyhow;
    let err = GatewayError::query(anyhow!("connection reset").context("could not load jobs"));
    let shown = display_causes(&err);
    assert!(shown.contains("query execution failed"));
    assert!(shown.contains("caused by: could not load jobs"));
}
