//! Various Rocket-related utilities.

use gridfactory_common::errors::display_causes;
use gridfactory_common::query::OutputFormat;
use gridfactory_common::{db, prelude::*};
use rocket::{
    fairing::{self, AdHoc},
    http::{ContentType, Status},
    request::{self, FromRequest, Outcome, Request},
    response::{self, Responder, Response},
    State,
};
use std::{io, ops};

/// A connection to our database, using a connection pool.
///
/// Rocket manages the pool as server state; this guard checks a connection
/// out of it for any handler that asks for one.
pub struct DbConn(db::PooledConnection);

impl DbConn {
    /// Return a "fairing" which can be used to attach a connection pool to a
    /// Rocket server.
    pub fn fairing() -> impl fairing::Fairing {
        AdHoc::try_on_ignite("DbConn", |rocket| async {
            // `Config` isn't available yet during ignition; pull the worker
            // count straight out of the figment.
            let workers = rocket
                .figment()
                .extract_inner::<u32>("workers")
                .unwrap_or(16);
            match db::pool(workers) {
                Ok(pool) => Ok(rocket.manage(DbPool(pool))),
                Err(err) => {
                    error!("failed to initialize database pool: {:?}", err);
                    Err(rocket)
                }
            }
        })
    }
}

// Rocket uses this to fetch `DbConn` parameters from the HTTP request
// automatically.
#[rocket::async_trait]
impl<'r> FromRequest<'r> for DbConn {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, ()> {
        // Try to get the connection pool attached to our server.
        let pool = match request.guard::<&State<DbPool>>().await {
            Outcome::Success(pool) => pool,
            _ => return Outcome::Error((Status::InternalServerError, ())),
        };

        // Get a connection.
        match pool.0.get() {
            Ok(conn) => Outcome::Success(DbConn(conn)),
            Err(_) => Outcome::Error((Status::ServiceUnavailable, ())),
        }
    }
}

// Transparently unwrap `DbConn` into `&mut PgConnection` when possible.
impl ops::Deref for DbConn {
    type Target = PgConnection;

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl ops::DerefMut for DbConn {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// This holds a `db::Pool` and it can be attached to a Rocket server.
struct DbPool(db::Pool);

/// The caller's transport-layer identity: the client-certificate subject
/// passed along by the TLS-terminating front end in `X-SSL-Client-S-DN`.
/// Absence is not an error by itself; write paths that need an identity
/// decline later instead.
pub struct CallerIdentity(Option<String>);

impl CallerIdentity {
    /// The certificate subject, if the front end supplied one.
    pub fn subject(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CallerIdentity {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, ()> {
        let subject = request
            .headers()
            .get_one("X-SSL-Client-S-DN")
            .map(|s| s.to_string());
        Outcome::Success(CallerIdentity(subject))
    }
}

/// An error response from the gateway. Wraps [`GatewayError`] so the closed
/// taxonomy maps onto HTTP statuses in exactly one place; callers only ever
/// see the generic bodies below, the details go to the log.
#[derive(Debug)]
pub struct ApiError(GatewayError);

impl ApiError {
    /// A 404 for unrecognized tables and missing records.
    pub fn not_found() -> ApiError {
        ApiError(GatewayError::NotFound)
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError(err)
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let (status, body) = match &self.0 {
            GatewayError::Schema(_) | GatewayError::Query(_) => {
                error!("{}", display_causes(&self.0));
                (Status::InternalServerError, "internal server error")
            }
            GatewayError::BadRequest(_) => {
                warn!("{}", self.0);
                (Status::BadRequest, "bad request")
            }
            GatewayError::Denied(_) => {
                warn!("{}", self.0);
                (Status::Forbidden, "declined")
            }
            GatewayError::NotFound => (Status::NotFound, "not found"),
        };
        Response::build()
            .status(status)
            .header(ContentType::Plain)
            .sized_body(body.len(), io::Cursor::new(body))
            .ok()
    }
}

/// Result type of `gridfactoryd` handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// A formatted result-set body plus the content type that goes with it.
pub struct FormattedBody {
    format: OutputFormat,
    body: String,
}

impl FormattedBody {
    /// Pair a rendered body with its format.
    pub fn new(format: OutputFormat, body: String) -> FormattedBody {
        FormattedBody { format, body }
    }
}

impl<'r> Responder<'r, 'static> for FormattedBody {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let content_type = match self.format {
            OutputFormat::Text => ContentType::Plain,
            OutputFormat::Xml => ContentType::XML,
        };
        Response::build()
            .header(content_type)
            .sized_body(self.body.len(), io::Cursor::new(self.body))
            .ok()
    }
}

/// The gateway speaks GET and PUT; everything else gets a 405 advertising
/// them.
pub struct MethodNotAllowed;

impl<'r> Responder<'r, 'static> for MethodNotAllowed {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        Response::build()
            .status(Status::MethodNotAllowed)
            .raw_header("Allow", "GET, PUT")
            .ok()
    }
}
