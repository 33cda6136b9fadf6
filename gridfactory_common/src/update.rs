//! Authorizing and applying record updates.

use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use diesel::sql_types::Text;
use percent_encoding::percent_decode_str;
use std::sync::Arc;

use crate::errors::{GatewayError, GatewayResult};
use crate::prelude::*;
use crate::schema::TableSchema;
use crate::tables::{
    IdentifierMatch, Table, ID_COL, LASTMODIFIED_COL, PROVIDERINFO_COL, READY_PREFIX, STATUS_COL,
};

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8_lossy()
        .trim_start_matches(' ')
        .to_string()
}

/// Parse a PUT body of newline-separated `key: value` pairs.
///
/// `+` decodes to space and both sides are percent-decoded and left-trimmed;
/// a line without `:` becomes a key with an empty value. A repeated key
/// keeps its last value.
pub fn parse_put_body(body: &str) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = Vec::new();
    for line in body.split('\n') {
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once(':') {
            Some((key, value)) => (decode_component(key), decode_component(value)),
            None => (decode_component(line), String::new()),
        };
        debug!("key: {}, value: {}", key, value);
        if let Some(entry) = fields.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            fields.push((key, value));
        }
    }
    fields
}

/// What kind of change a proposed job update amounts to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdateClass {
    /// No substantive change: at most `lastModified`.
    Touch,
    /// Exactly one of `csStatus` / `providerInfo` changes.
    StatusOnly,
    /// Both `csStatus` and `providerInfo` change, nothing else.
    StatusAndProvider,
    /// Some other field changes.
    Other,
}

/// Classify a proposed update by the field names it touches.
pub fn classify_update(fields: &[(String, String)]) -> UpdateClass {
    let mut class = UpdateClass::Touch;
    for (key, _) in fields {
        match key.as_str() {
            LASTMODIFIED_COL => {}
            STATUS_COL | PROVIDERINFO_COL => {
                class = match class {
                    UpdateClass::Touch => UpdateClass::StatusOnly,
                    UpdateClass::StatusOnly => UpdateClass::StatusAndProvider,
                    other => other,
                };
            }
            _ => return UpdateClass::Other,
        }
    }
    class
}

/// Decide whether a job update may proceed.
///
/// A job whose stored status starts with `ready` is waiting to be pulled;
/// while it is in that state only `csStatus` and `providerInfo` (and the
/// implicit `lastModified`) may change.
pub fn authorize_job_update(
    class: UpdateClass,
    current_status: Option<&str>,
) -> GatewayResult<()> {
    if class == UpdateClass::Other {
        if let Some(status) = current_status {
            if status.starts_with(READY_PREFIX) {
                return Err(GatewayError::denied(format!(
                    "for {} jobs, only changing {} and {} is allowed",
                    status, STATUS_COL, PROVIDERINFO_COL
                )));
            }
        }
    }
    Ok(())
}

/// What a node PUT should do once authorized.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeDecision {
    /// The record exists and the caller owns it: update in place.
    Update,
    /// No record at this identifier yet: create it.
    Insert,
}

/// Decide whether a node update may proceed, and as what.
///
/// An existing node record belongs to the identity stored in its
/// `providerInfo` at creation time; only that caller may modify it. A
/// missing record may be created by anyone who authenticated at all.
pub fn authorize_node_update(
    stored_provider: Option<&str>,
    caller: Option<&str>,
) -> GatewayResult<NodeDecision> {
    match stored_provider {
        Some(provider) => match caller {
            Some(caller) if caller == provider => Ok(NodeDecision::Update),
            Some(caller) => Err(GatewayError::denied(format!(
                "node belongs to {}, not to caller {}",
                provider, caller
            ))),
            None => Err(GatewayError::denied(
                "node update requires a caller identity",
            )),
        },
        None => match caller {
            Some(_) => Ok(NodeDecision::Insert),
            None => Err(GatewayError::denied(
                "node creation requires a caller identity",
            )),
        },
    }
}

/// Apply an authorized update: set `lastModified` to now plus every field
/// change, all values bound. Zero matched rows is still success.
pub fn apply_update(
    conn: &mut PgConnection,
    table: Table,
    schema: &Arc<TableSchema>,
    uuid: &str,
    fields: &[(String, String)],
) -> GatewayResult<usize> {
    let mut query = diesel::sql_query(format!(
        "UPDATE \"{}\" SET \"{}\" = NOW()",
        table.sql_name(),
        LASTMODIFIED_COL
    ))
    .into_boxed::<Pg>();

    let mut bind_nr = 0;
    for (name, value) in fields {
        if name == LASTMODIFIED_COL {
            continue;
        }
        let column = schema
            .column(name)
            .ok_or_else(|| GatewayError::bad_request(format!("unknown field '{}'", name)))?;
        bind_nr += 1;
        query = query
            .sql(format!(", \"{}\" = ${}", column, bind_nr))
            .bind::<Text, _>(value.clone());
    }

    bind_nr += 1;
    query = match table.identifier_match() {
        IdentifierMatch::Suffix => query
            .sql(format!(" WHERE \"{}\" LIKE ${}", ID_COL, bind_nr))
            .bind::<Text, _>(format!("%/{}", uuid)),
        IdentifierMatch::Exact => query
            .sql(format!(" WHERE \"{}\" = ${}", ID_COL, bind_nr))
            .bind::<Text, _>(uuid.to_string()),
    };

    let rows = query
        .execute(conn)
        .map_err(|err| GatewayError::query(anyhow!(err).context(format!(
            "query execution error updating '{}' in {}",
            uuid, table
        ))))?;
    if rows == 0 {
        // Matches the original behavior: updating a missing identifier is
        // not reported as an error to the caller.
        info!("update of '{}' in {} matched no rows", uuid, table);
    }
    Ok(rows)
}

/// Create a first-time node record. The identifier is stored exactly as
/// addressed (node lookups are exact matches), timestamps are set to now,
/// and `providerInfo` is forced to the caller identity so the ownership
/// invariant holds from creation on.
pub fn insert_node(
    conn: &mut PgConnection,
    schema: &Arc<TableSchema>,
    uuid: &str,
    caller: &str,
    fields: &[(String, String)],
) -> GatewayResult<usize> {
    let mut columns = vec![
        format!("\"{}\"", ID_COL),
        format!("\"{}\"", PROVIDERINFO_COL),
        format!("\"{}\"", LASTMODIFIED_COL),
    ];
    let mut values = vec!["$1".to_string(), "$2".to_string(), "NOW()".to_string()];
    if schema.column("created").is_some() {
        columns.push("\"created\"".to_string());
        values.push("NOW()".to_string());
    }

    let mut bound = Vec::new();
    let mut bind_nr = 2;
    for (name, value) in fields {
        if matches!(name.as_str(), ID_COL | PROVIDERINFO_COL | LASTMODIFIED_COL)
            || name == "created"
        {
            continue;
        }
        let column = schema
            .column(name)
            .ok_or_else(|| GatewayError::bad_request(format!("unknown field '{}'", name)))?;
        bind_nr += 1;
        columns.push(format!("\"{}\"", column));
        values.push(format!("${}", bind_nr));
        bound.push(value.clone());
    }

    let mut query = diesel::sql_query(format!(
        "INSERT INTO \"{}\" ({}) VALUES ({})",
        Table::Nodes.sql_name(),
        columns.join(", "),
        values.join(", ")
    ))
    .into_boxed::<Pg>()
    .bind::<Text, _>(uuid.to_string())
    .bind::<Text, _>(caller.to_string());
    for value in bound {
        query = query.bind::<Text, _>(value);
    }

    query.execute(conn).map_err(|err| {
        GatewayError::query(
            anyhow!(err).context(format!("query execution error inserting node '{}'", uuid)),
        )
    })
}

#[test]
fn put_body_parsing_decodes_and_trims() {
    let fields = parse_put_body("csStatus: ready\nname:%20my+job\nnoValue\nname: final");
    assert_eq!(
        fields,
        vec![
            ("csStatus".to_string(), "ready".to_string()),
            ("name".to_string(), "final".to_string()),
            ("noValue".to_string(), String::new()),
        ]
    );
}

#[cfg(test)]
fn fields_of(keys: &[&str]) -> Vec<(String, String)> {
    keys.iter().map(|k| (k.to_string(), "v".to_string())).collect()
}

#[test]
fn update_classification() {
    assert_eq!(classify_update(&fields_of(&[])), UpdateClass::Touch);
    assert_eq!(classify_update(&fields_of(&["lastModified"])), UpdateClass::Touch);
    assert_eq!(classify_update(&fields_of(&["csStatus"])), UpdateClass::StatusOnly);
    assert_eq!(classify_update(&fields_of(&["providerInfo"])), UpdateClass::StatusOnly);
    assert_eq!(
        classify_update(&fields_of(&["csStatus", "providerInfo"])),
        UpdateClass::StatusAndProvider
    );
    assert_eq!(
        classify_update(&fields_of(&["csStatus", "providerInfo", "ramMb"])),
        UpdateClass::Other
    );
}

#[test]
fn ready_jobs_only_accept_status_changes() {
    // Status and provider changes are fine while the job is ready.
    let class = classify_update(&fields_of(&["csStatus", "providerInfo"]));
    assert!(authorize_job_update(class, Some("ready-forXYZ")).is_ok());

    // Any other field change against a ready job is declined.
    let class = classify_update(&fields_of(&["csStatus", "providerInfo", "ramMb"]));
    assert!(authorize_job_update(class, Some("ready-forXYZ")).is_err());

    // Once the job is no longer ready, other fields may change again.
    assert!(authorize_job_update(class, Some("running")).is_ok());
    assert!(authorize_job_update(class, None).is_ok());
}

#[test]
fn node_ownership_is_enforced() {
    assert!(matches!(
        authorize_node_update(Some("CN=alice"), Some("CN=alice")),
        Ok(NodeDecision::Update)
    ));
    assert!(authorize_node_update(Some("CN=alice"), Some("CN=bob")).is_err());
    assert!(authorize_node_update(Some("CN=alice"), None).is_err());
    // A missing record is created instead of updated.
    assert!(matches!(
        authorize_node_update(None, Some("CN=alice")),
        Ok(NodeDecision::Insert)
    ));
    assert!(authorize_node_update(None, None).is_err());
}
