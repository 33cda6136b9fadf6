//! Translating a request's query string into parameterized SELECTs.
//!
//! Nothing a client sends is ever spliced into SQL text: filter values and
//! identifier patterns are bound as parameters, and filter *names* only make
//! it into the statement after being resolved against the introspected
//! column list.

use std::collections::HashMap;

use anyhow::Context;
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use diesel::sql_types::{Array, BigInt, Text};

use crate::errors::{GatewayError, GatewayResult};
use crate::prelude::*;
use crate::schema::{Record, TableSchema};
use crate::tables::{IdentifierMatch, Table};
use std::sync::Arc;

/// Requested output format.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OutputFormat {
    /// Tab-delimited text, the default.
    #[default]
    Text,
    /// XML.
    Xml,
}

/// An absolute row window: `count` rows starting at `offset`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Limit {
    /// Zero-based index of the first row to return.
    pub offset: i64,
    /// Number of rows to return.
    pub count: i64,
}

impl Limit {
    /// Apply the gateway's pagination policy to the `start`/`end` parameters.
    ///
    /// `start` and `end` are inclusive record indexes: both present selects
    /// `end - start + 1` rows from `start`; `end` alone selects the first
    /// `end + 1` rows; `start` alone is a malformed request.
    pub fn from_start_end(start: Option<i64>, end: Option<i64>) -> GatewayResult<Option<Limit>> {
        match (start, end) {
            (Some(_), None) => Err(GatewayError::bad_request(
                "when specifying 'start' you must specify 'end' as well",
            )),
            (Some(start), Some(end)) if end < start => Err(GatewayError::bad_request(
                "'end' must not be smaller than 'start'",
            )),
            (Some(start), Some(end)) => {
                let count = end
                    .checked_sub(start)
                    .and_then(|span| span.checked_add(1))
                    .ok_or_else(|| {
                        GatewayError::bad_request("'start' and 'end' span too many rows")
                    })?;
                Ok(Some(Limit {
                    offset: start,
                    count,
                }))
            }
            (None, Some(end)) => {
                let count = end.checked_add(1).ok_or_else(|| {
                    GatewayError::bad_request("'end' is too large")
                })?;
                Ok(Some(Limit { offset: 0, count }))
            }
            (None, None) => Ok(None),
        }
    }
}

/// A parsed list request: output format, equality filters, pagination.
#[derive(Clone, Debug, Default)]
pub struct ListRequest {
    /// Requested output format.
    pub format: OutputFormat,
    /// Column-equality filters, sorted by column name so the generated SQL
    /// is deterministic. All filters are AND-combined.
    pub filters: Vec<(String, String)>,
    /// Pagination window, if any.
    pub limit: Option<Limit>,
}

/// Pick the output format out of a decoded query-string map. An unknown
/// value is logged and ignored, leaving the text default.
pub fn parse_format(params: &HashMap<String, String>) -> OutputFormat {
    match params.get("format").map(String::as_str) {
        Some("text") | None => OutputFormat::Text,
        Some("xml") => OutputFormat::Xml,
        Some(other) => {
            error!("format {} unknown", other);
            OutputFormat::Text
        }
    }
}

fn parse_index(params: &HashMap<String, String>, key: &str) -> GatewayResult<Option<i64>> {
    match params.get(key) {
        None => Ok(None),
        Some(raw) => {
            let value = raw
                .parse::<i64>()
                .ok()
                .filter(|v| *v >= 0)
                .ok_or_else(|| {
                    GatewayError::bad_request(format!("'{}' must be a non-negative integer", key))
                })?;
            Ok(Some(value))
        }
    }
}

/// Parse the decoded query string of a list request.
///
/// `format`, `start` and `end` are reserved; every other key is treated as a
/// column-equality filter.
pub fn parse_list_params(params: &HashMap<String, String>) -> GatewayResult<ListRequest> {
    let format = parse_format(params);
    let limit = Limit::from_start_end(parse_index(params, "start")?, parse_index(params, "end")?)?;
    let mut filters = params
        .iter()
        .filter(|(key, _)| !matches!(key.as_str(), "format" | "start" | "end"))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect::<Vec<_>>();
    filters.sort();
    Ok(ListRequest {
        format,
        filters,
        limit,
    })
}

#[derive(QueryableByName)]
struct TextRow {
    #[diesel(sql_type = Array<Text>)]
    vals: Vec<String>,
}

fn rows_to_records(schema: &Arc<TableSchema>, rows: Vec<TextRow>) -> GatewayResult<Vec<Record>> {
    rows.into_iter()
        .map(|row| Record::new(schema.clone(), row.vals).map_err(GatewayError::query))
        .collect()
}

/// Run a list query: every record of `table` matching the request's filters,
/// within its pagination window.
pub fn select_records(
    conn: &mut PgConnection,
    table: Table,
    schema: &Arc<TableSchema>,
    request: &ListRequest,
) -> GatewayResult<Vec<Record>> {
    let mut query = diesel::sql_query(format!(
        "SELECT {} AS vals FROM \"{}\"",
        schema.select_expr(),
        table.sql_name()
    ))
    .into_boxed::<Pg>();

    let mut bind_nr = 0;
    for (name, value) in &request.filters {
        let column = schema.column(name).ok_or_else(|| {
            GatewayError::bad_request(format!("unknown field '{}' in filter", name))
        })?;
        bind_nr += 1;
        let keyword = if bind_nr == 1 { "WHERE" } else { "AND" };
        query = query
            .sql(format!(" {} \"{}\" = ${}", keyword, column, bind_nr))
            .bind::<Text, _>(value.clone());
    }
    if let Some(limit) = request.limit {
        query = query
            .sql(format!(" LIMIT ${} OFFSET ${}", bind_nr + 1, bind_nr + 2))
            .bind::<BigInt, _>(limit.count)
            .bind::<BigInt, _>(limit.offset);
    }

    let rows = query
        .load::<TextRow>(conn)
        .with_context(|| format!("query execution error listing {}", table))
        .map_err(GatewayError::query)?;
    debug!("returning {} rows from {}", rows.len(), table);
    rows_to_records(schema, rows)
}

/// Look up the record(s) addressed by the trailing `uuid` path segment.
///
/// Job and history identifiers are hierarchical, so this is a bound
/// `LIKE '%/<uuid>'` suffix match; node identifiers are matched exactly.
pub fn select_record(
    conn: &mut PgConnection,
    table: Table,
    schema: &Arc<TableSchema>,
    uuid: &str,
) -> GatewayResult<Vec<Record>> {
    let head = format!(
        "SELECT {} AS vals FROM \"{}\"",
        schema.select_expr(),
        table.sql_name()
    );
    let query = match table.identifier_match() {
        IdentifierMatch::Suffix => diesel::sql_query(head)
            .into_boxed::<Pg>()
            .sql(" WHERE \"identifier\" LIKE $1")
            .bind::<Text, _>(format!("%/{}", uuid)),
        IdentifierMatch::Exact => diesel::sql_query(head)
            .into_boxed::<Pg>()
            .sql(" WHERE \"identifier\" = $1")
            .bind::<Text, _>(uuid.to_string()),
    };
    let rows = query
        .load::<TextRow>(conn)
        .with_context(|| format!("query execution error looking up '{}' in {}", uuid, table))
        .map_err(GatewayError::query)?;
    rows_to_records(schema, rows)
}

#[test]
fn pagination_policy() {
    // start=2&end=4 selects exactly rows 2, 3 and 4.
    let limit = Limit::from_start_end(Some(2), Some(4)).unwrap().unwrap();
    assert_eq!(limit, Limit { offset: 2, count: 3 });

    // end=4 alone selects the first five rows.
    let limit = Limit::from_start_end(None, Some(4)).unwrap().unwrap();
    assert_eq!(limit, Limit { offset: 0, count: 5 });

    // start without end is declined.
    assert!(Limit::from_start_end(Some(2), None).is_err());

    // An inverted window is declined.
    assert!(Limit::from_start_end(Some(4), Some(2)).is_err());

    assert_eq!(Limit::from_start_end(None, None).unwrap(), None);
}

#[test]
fn pagination_windows_at_the_integer_boundary_are_rejected() {
    // `end` is inclusive, so a window ending at i64::MAX would need one more
    // row than fits in the count.
    assert!(Limit::from_start_end(None, Some(i64::MAX)).is_err());
    assert!(Limit::from_start_end(Some(0), Some(i64::MAX)).is_err());

    // One short of the boundary still works.
    let limit = Limit::from_start_end(Some(1), Some(i64::MAX)).unwrap().unwrap();
    assert_eq!(
        limit,
        Limit {
            offset: 1,
            count: i64::MAX,
        }
    );
}

#[test]
fn list_params_split_reserved_keys_from_filters() {
    let params: HashMap<String, String> = [
        ("format", "xml"),
        ("start", "0"),
        ("end", "9"),
        ("csStatus", "ready"),
        ("opSys", "Linux"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    let request = parse_list_params(&params).unwrap();
    assert_eq!(request.format, OutputFormat::Xml);
    assert_eq!(request.limit, Some(Limit { offset: 0, count: 10 }));
    // Filters are sorted for deterministic SQL.
    assert_eq!(
        request.filters,
        vec![
            ("csStatus".to_string(), "ready".to_string()),
            ("opSys".to_string(), "Linux".to_string()),
        ]
    );
}

#[test]
fn unknown_format_falls_back_to_text() {
    let params: HashMap<String, String> =
        [("format".to_string(), "yaml".to_string())].into_iter().collect();
    assert_eq!(parse_format(&params), OutputFormat::Text);
}

#[test]
fn bad_pagination_values_are_rejected() {
    for (key, value) in [("start", "x"), ("end", "-3")] {
        let params: HashMap<String, String> =
            [(key.to_string(), value.to_string())].into_iter().collect();
        assert!(parse_list_params(&params).is_err());
    }
}
