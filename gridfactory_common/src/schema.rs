//! Runtime discovery of table columns.
//!
//! The column sets of the job database are not fixed at compile time: the
//! grid infrastructure owns the schema and extends it between releases. We
//! ask `information_schema` once per table and keep the answer for the
//! process lifetime in a write-once, read-through cache.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Context;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::Text;

use crate::errors::{GatewayError, GatewayResult};
use crate::prelude::*;
use crate::tables::{Table, DBURL_COL};

/// The ordered column list of one table, plus derived lookups.
#[derive(Debug)]
pub struct TableSchema {
    /// Stored column names, in ordinal position order. Does not include the
    /// `dbUrl` pseudo-column.
    columns: Vec<String>,
    /// Tab-joined column names with `dbUrl` appended, as served as the first
    /// line of text-format listings.
    header: String,
}

impl TableSchema {
    fn new(columns: Vec<String>) -> TableSchema {
        let mut header = columns.join("\t");
        header.push('\t');
        header.push_str(DBURL_COL);
        TableSchema { columns, header }
    }

    /// The stored columns, in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The tab-joined field list, `dbUrl` last.
    pub fn header_line(&self) -> &str {
        &self.header
    }

    /// Return the canonical column name if `name` is a stored column. This
    /// is the only way client-supplied field names ever reach SQL text.
    pub fn column(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|col| col.as_str() == name)
            .map(|col| col.as_str())
    }

    /// Positional index of a column, by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col == name)
    }

    /// A SQL expression selecting every column as text, `NULL` coalesced to
    /// the empty string, in schema order.
    pub fn select_expr(&self) -> String {
        let cols = self
            .columns
            .iter()
            .map(|col| format!("COALESCE(\"{}\"::text, '')", col))
            .collect::<Vec<_>>()
            .join(", ");
        format!("ARRAY[{}]", cols)
    }

    /// Build a schema directly from column names, for tests.
    #[cfg(test)]
    pub fn factory(columns: &[&str]) -> Arc<TableSchema> {
        Arc::new(TableSchema::new(
            columns.iter().map(|c| c.to_string()).collect(),
        ))
    }
}

/// One row of a table, keyed by column name.
///
/// Values arrive as text with `NULL` already coalesced to `""`; an empty
/// value and a missing value are deliberately the same thing, matching how
/// the formatters treat them.
#[derive(Clone, Debug)]
pub struct Record {
    schema: Arc<TableSchema>,
    values: Vec<String>,
}

impl Record {
    /// Pair up a schema with one row of values.
    pub fn new(schema: Arc<TableSchema>, values: Vec<String>) -> Result<Record> {
        anyhow::ensure!(
            values.len() == schema.columns().len(),
            "row has {} values but table has {} columns",
            values.len(),
            schema.columns().len()
        );
        Ok(Record { schema, values })
    }

    /// The value of a column, if the column exists.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.schema
            .index_of(name)
            .map(|idx| self.values[idx].as_str())
    }

    /// The value of a column, only if it exists and is non-empty.
    pub fn non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|val| !val.is_empty())
    }

    /// The record's identifier, or `""` if the table somehow lacks one.
    pub fn identifier(&self) -> &str {
        self.get(crate::tables::ID_COL).unwrap_or("")
    }

    /// Iterate over `(column, value)` pairs in schema order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.schema
            .columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }

    /// Build a record from bare values, for tests.
    #[cfg(test)]
    pub fn factory(schema: &Arc<TableSchema>, values: &[&str]) -> Record {
        Record::new(
            schema.clone(),
            values.iter().map(|v| v.to_string()).collect(),
        )
        .expect("factory value count must match schema")
    }
}

#[derive(QueryableByName)]
struct ColumnRow {
    #[diesel(sql_type = Text)]
    column_name: String,
}

/// Ask `information_schema` for the columns of `table`.
fn introspect(table: Table, conn: &mut PgConnection) -> Result<TableSchema> {
    let rows = diesel::sql_query(
        "SELECT column_name FROM information_schema.columns \
         WHERE table_name = $1 ORDER BY ordinal_position",
    )
    .bind::<Text, _>(table.sql_name())
    .load::<ColumnRow>(conn)
    .with_context(|| format!("could not introspect columns of {}", table))?;
    anyhow::ensure!(!rows.is_empty(), "table {} has no columns", table);
    let schema = TableSchema::new(rows.into_iter().map(|r| r.column_name).collect());
    info!("found fields for {}: {}", table, schema.header_line());
    Ok(schema)
}

/// Process-wide cache of discovered table schemas.
///
/// Read-through and write-once per table: the first request for a table pays
/// for the introspection query, everyone after shares the `Arc`. The schema
/// is never invalidated; a live schema change requires a restart.
#[derive(Debug, Default)]
pub struct SchemaCache {
    inner: RwLock<HashMap<Table, Arc<TableSchema>>>,
}

impl SchemaCache {
    /// Create an empty cache.
    pub fn new() -> SchemaCache {
        SchemaCache::default()
    }

    /// The schema of `table`, introspecting it on first use.
    pub fn fields(&self, table: Table, conn: &mut PgConnection) -> GatewayResult<Arc<TableSchema>> {
        {
            let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(schema) = map.get(&table) {
                return Ok(schema.clone());
            }
        }
        let schema = Arc::new(introspect(table, conn).map_err(GatewayError::schema)?);
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        // Two requests may race to introspect the same table; keep whichever
        // schema landed first so every caller sees one consistent value.
        Ok(map.entry(table).or_insert(schema).clone())
    }
}

#[test]
fn header_line_appends_db_url() {
    let schema = TableSchema::factory(&["identifier", "name", "csStatus"]);
    assert_eq!(schema.header_line(), "identifier\tname\tcsStatus\tdbUrl");
}

#[test]
fn select_expr_coalesces_every_column() {
    let schema = TableSchema::factory(&["identifier", "name"]);
    assert_eq!(
        schema.select_expr(),
        "ARRAY[COALESCE(\"identifier\"::text, ''), COALESCE(\"name\"::text, '')]"
    );
}

#[test]
fn record_lookups_are_name_keyed() {
    let schema = TableSchema::factory(&["identifier", "name", "csStatus"]);
    let record = Record::factory(&schema, &["https://h/db/jobs/abc", "job one", ""]);
    assert_eq!(record.identifier(), "https://h/db/jobs/abc");
    assert_eq!(record.get("name"), Some("job one"));
    assert_eq!(record.get("csStatus"), Some(""));
    assert_eq!(record.non_empty("csStatus"), None);
    assert_eq!(record.get("nope"), None);
}
