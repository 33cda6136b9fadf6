//! `gridfactoryd`: a web service exposing the gridfactory job database.
//!
//! Three tables — job definitions, job history, node information — are
//! served as privacy-filtered listings and single records, in tab-delimited
//! text or XML, and job/node records can be updated (or, for nodes, created)
//! by authorized callers via PUT.

use std::collections::HashMap;

use gridfactory_common::{
    format, gridfactory_common_version,
    prelude::*,
    query::{self, OutputFormat},
    tables::{PROVIDERINFO_COL, STATUS_COL},
    tracing_support,
    update::{self, NodeDecision, UpdateClass},
};
use rocket::data::{ByteUnit, Limits};
use rocket::fairing::AdHoc;
use rocket::{delete, get, launch, patch, post, put, routes, State};

mod util;

use util::{ApiError, ApiResult, CallerIdentity, DbConn, FormattedBody, MethodNotAllowed};

/// Return our `gridfactory_common` version, useful for deployment checks.
#[get("/version")]
fn version() -> String {
    gridfactory_common_version().to_string()
}

/// List records of one table, privacy-filtered, honoring `format`, `start`,
/// `end` and column-equality filters in the query string.
#[get("/<table>?<params..>")]
fn list_records(
    table: &str,
    params: HashMap<String, String>,
    mut conn: DbConn,
    cache: &State<SchemaCache>,
    config: &State<GatewayConfig>,
) -> ApiResult<FormattedBody> {
    let table = Table::from_segment(table).ok_or_else(ApiError::not_found)?;
    let request = query::parse_list_params(&params)?;
    let schema = cache.fields(table, &mut conn)?;
    let records = query::select_records(&mut conn, table, &schema, &request)?;
    let base_url = config.table_base_url(table);
    let body = match request.format {
        OutputFormat::Text => format::records_text(
            &records,
            &schema,
            table,
            true,
            &base_url,
            config.max_rows,
        ),
        OutputFormat::Xml => format::records_xml(
            &records,
            table,
            &base_url,
            config.xsl_base_url.as_deref(),
            config.max_rows,
        ),
    };
    Ok(FormattedBody::new(request.format, body))
}

/// Look up one record by the trailing segment of its identifier and render
/// every field, unfiltered.
#[get("/<table>/<uuid>?<params..>")]
fn get_record(
    table: &str,
    uuid: &str,
    params: HashMap<String, String>,
    mut conn: DbConn,
    cache: &State<SchemaCache>,
    config: &State<GatewayConfig>,
) -> ApiResult<FormattedBody> {
    let table = Table::from_segment(table).ok_or_else(ApiError::not_found)?;
    let output_format = query::parse_format(&params);
    let schema = cache.fields(table, &mut conn)?;
    let records = query::select_record(&mut conn, table, &schema, uuid)?;
    if records.is_empty() {
        return Err(ApiError::not_found());
    }
    let body = match output_format {
        OutputFormat::Text => format::record_text(&records),
        OutputFormat::Xml => format::record_xml(
            &records,
            table,
            &config.table_base_url(table),
            config.xsl_base_url.as_deref(),
        ),
    };
    Ok(FormattedBody::new(output_format, body))
}

/// Update a job or node record (or create a first-time node record) from a
/// body of newline-separated `key: value` pairs.
#[put("/<table>/<uuid>", data = "<body>")]
fn put_record(
    table: &str,
    uuid: &str,
    body: &str,
    caller: CallerIdentity,
    mut conn: DbConn,
    cache: &State<SchemaCache>,
) -> ApiResult<&'static str> {
    let table = Table::from_segment(table).ok_or_else(ApiError::not_found)?;
    let schema = cache.fields(table, &mut conn)?;
    let fields = update::parse_put_body(body);

    match table {
        Table::History => {
            return Err(GatewayError::denied(
                "job history cannot be modified through this gateway",
            )
            .into());
        }
        Table::Jobs => {
            let class = update::classify_update(&fields);
            if class == UpdateClass::Other {
                // Writing anything beyond status fields is only allowed once
                // the job has left the "ready" state.
                let records = query::select_record(&mut conn, table, &schema, uuid)?;
                let status = records
                    .first()
                    .and_then(|record| record.non_empty(STATUS_COL))
                    .map(str::to_string);
                update::authorize_job_update(class, status.as_deref())?;
            }
            update::apply_update(&mut conn, table, &schema, uuid, &fields)?;
        }
        Table::Nodes => {
            let records = query::select_record(&mut conn, table, &schema, uuid)?;
            let stored_provider = records
                .first()
                .map(|record| record.get(PROVIDERINFO_COL).unwrap_or("").to_string());
            match update::authorize_node_update(stored_provider.as_deref(), caller.subject())? {
                NodeDecision::Update => {
                    update::apply_update(&mut conn, table, &schema, uuid, &fields)?;
                }
                NodeDecision::Insert => {
                    let subject = caller.subject().unwrap_or_default();
                    update::insert_node(&mut conn, &schema, uuid, subject, &fields)?;
                }
            }
        }
    }

    Ok("OK")
}

// The gateway only speaks GET and PUT; answer everything else with a 405
// advertising them instead of Rocket's default 404.

#[post("/<_..>")]
fn post_not_allowed() -> MethodNotAllowed {
    MethodNotAllowed
}

#[delete("/<_..>")]
fn delete_not_allowed() -> MethodNotAllowed {
    MethodNotAllowed
}

#[patch("/<_..>")]
fn patch_not_allowed() -> MethodNotAllowed {
    MethodNotAllowed
}

#[launch]
fn rocket() -> _ {
    tracing_support::initialize_tracing();

    // PUT bodies are plain strings; allow up to 1 MiB before Rocket answers
    // 413 on its own.
    let figment = rocket::Config::figment()
        .merge(("limits", Limits::default().limit("string", ByteUnit::Mebibyte(1))));

    rocket::custom(figment)
        // Pull our gateway configuration out of Rocket's figment.
        .attach(AdHoc::config::<GatewayConfig>())
        // Attach our custom connection pool.
        .attach(DbConn::fairing())
        // Table schemas are discovered on first use and cached for the
        // process lifetime.
        .manage(SchemaCache::new())
        .mount(
            "/",
            routes![
                version,
                list_records,
                get_record,
                put_record,
                post_not_allowed,
                delete_not_allowed,
                patch_not_allowed,
            ],
        )
}

#[test]
fn gateway_routes_are_mounted() {
    let server = rocket();
    let mounted = server
        .routes()
        .map(|route| format!("{} {}", route.method, route.uri))
        .collect::<Vec<_>>();
    for expected in [
        "GET /version",
        "GET /<table>?<params..>",
        "GET /<table>/<uuid>?<params..>",
        "PUT /<table>/<uuid>",
        "POST /<_..>",
        "DELETE /<_..>",
        "PATCH /<_..>",
    ] {
        assert!(
            mounted.contains(&expected.to_string()),
            "missing route {}: {:?}",
            expected,
            mounted
        );
    }
}
