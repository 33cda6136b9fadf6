//! Rendering result sets as tab-delimited text or XML.

use crate::prelude::*;
use crate::schema::{Record, TableSchema};
use crate::tables::{self, Table, DBURL_COL, ID_COL};

/// Synthesize the `dbUrl` pseudo-value for a record: the configured base URL
/// plus the identifier's suffix after the final `/`.
pub fn construct_db_url(base_url: &str, identifier: &str) -> String {
    let uuid = match identifier.rfind('/') {
        Some(pos) => &identifier[pos + 1..],
        None => identifier,
    };
    format!("{}{}", base_url, uuid)
}

/// Is `field` on the public allow-list?
///
/// The allow-list is a tab-joined string, and membership means appearing as
/// a whole tab-delimited token: `name` must not match inside `hostname`.
pub fn is_public_field(public_fields: &str, field: &str) -> bool {
    public_fields.split('\t').any(|token| token == field)
}

/// Escape a value for use in XML text content.
pub fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Enforce the row cap: truncate `records` to `max_rows`, logging a warning
/// when anything is cut. Never an error.
fn cap_rows(records: &[Record], max_rows: usize, table: Table) -> &[Record] {
    if records.len() > max_rows {
        warn!(
            "truncating {} listing at {} of {} rows",
            table,
            max_rows,
            records.len()
        );
        &records[..max_rows]
    } else {
        records
    }
}

/// Render a list of records as tab-delimited text.
///
/// The first line is the field list; with `privacy` on it is the public
/// subset, and only public columns are emitted for each row. Every row ends
/// with the synthesized `dbUrl` value.
pub fn records_text(
    records: &[Record],
    schema: &TableSchema,
    table: Table,
    privacy: bool,
    base_url: &str,
    max_rows: usize,
) -> String {
    let public_fields = table.public_fields();
    let mut out = if privacy {
        public_fields.to_string()
    } else {
        schema.header_line().to_string()
    };
    for record in cap_rows(records, max_rows, table) {
        let mut values = Vec::with_capacity(schema.columns().len() + 1);
        for (name, value) in record.fields() {
            if privacy && !is_public_field(public_fields, name) {
                continue;
            }
            values.push(value);
        }
        let db_url = construct_db_url(base_url, record.identifier());
        out.push('\n');
        out.push_str(&values.join("\t"));
        out.push('\t');
        out.push_str(&db_url);
    }
    out
}

fn push_element(out: &mut String, indent: &str, name: &str, value: &str) {
    out.push_str(&format!(
        "\n{}<{}>{}</{}>",
        indent,
        name,
        xml_escape(value),
        name
    ));
}

fn xml_prologue(table: Table, xsl_base_url: Option<&str>) -> String {
    let mut out = "<?xml version=\"1.0\"?>\n".to_string();
    if let Some(xsl) = xsl_base_url {
        out.push_str(&format!(
            "<?xml-stylesheet type=\"text/xsl\" href=\"{}/{}.xsl\"?>\n",
            xsl.trim_end_matches('/'),
            table.segment()
        ));
    }
    out
}

/// Render a list of records as XML.
///
/// Each record becomes one child of the per-table root element, carrying
/// sub-elements for the identifier, the table's highlighted fields and the
/// synthesized `dbUrl`. Empty values are omitted entirely.
pub fn records_xml(
    records: &[Record],
    table: Table,
    base_url: &str,
    xsl_base_url: Option<&str>,
    max_rows: usize,
) -> String {
    let mut out = xml_prologue(table, xsl_base_url);
    out.push_str(&format!("<{}>", table.root_element()));
    for record in cap_rows(records, max_rows, table) {
        out.push_str(&format!("\n  <{}>", table.record_element()));
        if let Some(id) = record.non_empty(ID_COL) {
            push_element(&mut out, "    ", ID_COL, id);
        }
        for &name in table.highlighted_fields() {
            if let Some(value) = record.non_empty(name) {
                push_element(&mut out, "    ", name, value);
            }
        }
        let db_url = construct_db_url(base_url, record.identifier());
        push_element(&mut out, "    ", DBURL_COL, &db_url);
        out.push_str(&format!("\n  </{}>", table.record_element()));
    }
    out.push_str(&format!("\n</{}>\n", table.root_element()));
    out
}

/// Render a single record (or several rows matching one identifier) as
/// `field: value` lines, in schema order. Rows are separated by a blank
/// line. No privacy filtering: single-record views show everything.
pub fn record_text(records: &[Record]) -> String {
    let mut out = String::new();
    for (nr, record) in records.iter().enumerate() {
        if nr > 0 {
            out.push_str("\n\n");
        }
        for (field_nr, (name, value)) in record.fields().enumerate() {
            if field_nr > 0 {
                out.push('\n');
            }
            out.push_str(&format!("{}: {}", name, value));
        }
    }
    out
}

/// Expand one field into XML child elements, honoring list- and pair-typed
/// fields: space-delimited list fields become repeated singular elements,
/// and `outFileMapping` becomes `(source, destination)` element pairs.
fn push_field_xml(out: &mut String, name: &str, value: &str) {
    if let Some(element) = tables::list_element(name) {
        for entry in value.split_whitespace() {
            push_element(out, "  ", element, entry);
        }
    } else if name == tables::OUT_FILE_MAPPING_COL {
        let mut parts = value.split_whitespace();
        while let Some(source) = parts.next() {
            push_element(out, "  ", "source", source);
            if let Some(destination) = parts.next() {
                push_element(out, "  ", "destination", destination);
            }
        }
    } else {
        push_element(out, "  ", name, value);
    }
}

/// Render a single record as XML: one `<job>`/`<history>`/`<node>` root with
/// a child element per non-empty field, plus the synthesized `dbUrl`.
pub fn record_xml(
    records: &[Record],
    table: Table,
    base_url: &str,
    xsl_base_url: Option<&str>,
) -> String {
    let mut out = xml_prologue(table, xsl_base_url);
    out.push_str(&format!("<{}>", table.record_element()));
    for record in records {
        for (name, value) in record.fields() {
            if value.is_empty() {
                continue;
            }
            push_field_xml(&mut out, name, value);
        }
        let db_url = construct_db_url(base_url, record.identifier());
        push_element(&mut out, "  ", DBURL_COL, &db_url);
    }
    out.push_str(&format!("\n</{}>\n", table.record_element()));
    out
}

#[test]
fn db_url_uses_trailing_identifier_segment() {
    assert_eq!(
        construct_db_url("https://host/db/jobs/", "https://other/db/jobs/abc-123"),
        "https://host/db/jobs/abc-123"
    );
    // No slash at all: use the identifier as-is.
    assert_eq!(construct_db_url("https://host/db/nodes/", "n1"), "https://host/db/nodes/n1");
}

#[test]
fn public_field_check_matches_whole_tokens_only() {
    let public_fields = "identifier\thost\tname";
    assert!(is_public_field(public_fields, "name"));
    assert!(is_public_field(public_fields, "host"));
    // Substrings of listed fields must not match.
    assert!(!is_public_field(public_fields, "hostname"));
    assert!(!is_public_field(public_fields, "ame"));
    assert!(!is_public_field(public_fields, "csStatus"));
}

#[test]
fn xml_escape_handles_markup_chars() {
    let examples = &[
        ("plain", "plain"),
        ("a&b", "a&amp;b"),
        ("<tag>", "&lt;tag&gt;"),
        ("'\"", "&apos;&quot;"),
    ];
    for &(input, expected) in examples {
        assert_eq!(xml_escape(input), expected);
    }
}

#[cfg(test)]
fn job_fixture() -> (std::sync::Arc<TableSchema>, Vec<Record>) {
    let schema = TableSchema::factory(&["identifier", "name", "csStatus", "gridId"]);
    let records = vec![
        Record::factory(&schema, &["https://h/db/jobs/a-1", "one", "ready", "g1"]),
        Record::factory(&schema, &["https://h/db/jobs/b-2", "two", "", "g2"]),
    ];
    (schema, records)
}

#[test]
fn text_listing_filters_private_fields_and_appends_db_url() {
    let (schema, records) = job_fixture();
    let body = records_text(&records, &schema, Table::Jobs, true, "https://h/db/jobs/", 100);
    let lines = body.lines().collect::<Vec<_>>();
    assert_eq!(lines[0], Table::Jobs.public_fields());
    // gridId is not public, so rows carry identifier, name, csStatus, dbUrl.
    assert_eq!(lines[1], "https://h/db/jobs/a-1\tone\tready\thttps://h/db/jobs/a-1");
    assert_eq!(lines[2], "https://h/db/jobs/b-2\ttwo\t\thttps://h/db/jobs/b-2");
}

#[test]
fn text_listing_without_privacy_uses_full_header() {
    let (schema, records) = job_fixture();
    let body = records_text(&records, &schema, Table::Jobs, false, "https://h/db/jobs/", 100);
    assert!(body.starts_with("identifier\tname\tcsStatus\tgridId\tdbUrl\n"));
    assert!(body.contains("\tg1\t"));
}

#[test]
fn xml_listing_highlights_fields_and_omits_empty_values() {
    let (_, records) = job_fixture();
    let body = records_xml(&records, Table::Jobs, "https://h/db/jobs/", None, 100);
    assert!(body.starts_with("<?xml version=\"1.0\"?>\n<jobs>"));
    assert!(body.contains("<name>one</name>"));
    assert!(body.contains("<csStatus>ready</csStatus>"));
    // The second record's empty csStatus is omitted, not emitted empty.
    assert_eq!(body.matches("<csStatus>").count(), 1);
    assert!(!body.contains("<csStatus></csStatus>"));
    assert!(body.contains("<dbUrl>https://h/db/jobs/b-2</dbUrl>"));
    assert!(body.ends_with("</jobs>\n"));
}

#[test]
fn xml_stylesheet_instruction_points_at_configured_directory() {
    let (_, records) = job_fixture();
    let body = records_xml(
        &records,
        Table::Jobs,
        "https://h/db/jobs/",
        Some("https://h/xsl"),
        100,
    );
    assert!(body.contains(
        "<?xml-stylesheet type=\"text/xsl\" href=\"https://h/xsl/jobs.xsl\"?>"
    ));
}

#[test]
fn listings_truncate_at_the_row_cap() {
    let (schema, records) = job_fixture();
    let body = records_text(&records, &schema, Table::Jobs, true, "https://h/db/jobs/", 1);
    assert_eq!(body.lines().count(), 2); // header plus one row
    let body = records_xml(&records, Table::Jobs, "https://h/db/jobs/", None, 1);
    assert_eq!(body.matches("<job>").count(), 1);
}

#[test]
fn single_record_text_lists_every_field() {
    let (_, records) = job_fixture();
    let body = record_text(&records[..1]);
    assert_eq!(
        body,
        "identifier: https://h/db/jobs/a-1\nname: one\ncsStatus: ready\ngridId: g1"
    );
}

#[test]
fn single_record_xml_expands_list_fields() {
    let schema = TableSchema::factory(&["identifier", "allowedVOs", "outFileMapping", "opSys"]);
    let record = Record::factory(
        &schema,
        &["https://h/db/jobs/a-1", "VO1 VO2", "out.log /data/out.log", ""],
    );
    let body = record_xml(&[record], Table::Jobs, "https://h/db/jobs/", None);
    assert!(body.starts_with("<?xml version=\"1.0\"?>\n<job>"));
    // "VO1 VO2" expands into two repeated sub-elements.
    assert!(body.contains("<allowedVO>VO1</allowedVO>"));
    assert!(body.contains("<allowedVO>VO2</allowedVO>"));
    // outFileMapping expands into a (source, destination) pair.
    assert!(body.contains("<source>out.log</source>"));
    assert!(body.contains("<destination>/data/out.log</destination>"));
    // The empty opSys field is omitted.
    assert!(!body.contains("opSys"));
    assert!(body.ends_with("</job>\n"));
}
