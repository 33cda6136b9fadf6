//! The three tables served by the gateway.
//!
//! Everything table-specific lives behind the closed [`Table`] enum: SQL
//! names, URL path segments, XML element names, the public-field allow-lists
//! and how identifiers are matched. Handlers dispatch on a `Table` value
//! instead of switching on magic numbers.

use std::fmt;

/// Name of the identifier column.
pub const ID_COL: &str = "identifier";

/// Name of the status column.
pub const STATUS_COL: &str = "csStatus";

/// Name of the last-modified column.
pub const LASTMODIFIED_COL: &str = "lastModified";

/// Name of the provider-info column, which records a node's owner.
pub const PROVIDERINFO_COL: &str = "providerInfo";

/// Name of the DB URL pseudo-column.
pub const DBURL_COL: &str = "dbUrl";

/// Status prefix marking a job that is waiting to be pulled. While a job is
/// in this state, only `csStatus` and `providerInfo` may be rewritten.
pub const READY_PREFIX: &str = "ready";

/// The flattened `(source, destination)` pair field.
pub const OUT_FILE_MAPPING_COL: &str = "outFileMapping";

/// Public fields of the `jobDefinition` table, tab-joined, `dbUrl` last.
const JOB_PUB_FIELDS: &str = "identifier\tname\tcsStatus\tuserInfo\tcreated\tlastModified\trunningSeconds\tramMb\topSys\truntimeEnvironments\tallowedVOs\tvirtualize\tdbUrl";

/// Public fields of the `nodeInformation` table, tab-joined, `dbUrl` last.
const NODE_PUB_FIELDS: &str = "identifier\thost\tmaxJobs\tallowedVOs\tvirtualize\thypervisors\tmaxMBPerJob\tproviderInfo\tcreated\tlastModified\tdbUrl";

/// How a table matches a record identifier given the trailing UUID segment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IdentifierMatch {
    /// Job and history identifiers are hierarchical URLs; match on the
    /// `%/<uuid>` suffix.
    Suffix,
    /// Node identifiers are matched exactly.
    Exact,
}

/// One of the three tables of the job database.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Table {
    /// Job definitions (`jobDefinition`).
    Jobs,
    /// Job history (`jobHistory`). Read-only through this gateway.
    History,
    /// Node information (`nodeInformation`).
    Nodes,
}

impl Table {
    /// Look up a table from its URL path segment.
    pub fn from_segment(segment: &str) -> Option<Table> {
        match segment {
            "jobs" => Some(Table::Jobs),
            "history" => Some(Table::History),
            "nodes" => Some(Table::Nodes),
            _ => None,
        }
    }

    /// The URL path segment, which is also the XML root element name.
    pub fn segment(self) -> &'static str {
        match self {
            Table::Jobs => "jobs",
            Table::History => "history",
            Table::Nodes => "nodes",
        }
    }

    /// The underlying SQL table name.
    pub fn sql_name(self) -> &'static str {
        match self {
            Table::Jobs => "jobDefinition",
            Table::History => "jobHistory",
            Table::Nodes => "nodeInformation",
        }
    }

    /// The XML element name for one record of this table.
    pub fn record_element(self) -> &'static str {
        match self {
            Table::Jobs => "job",
            Table::History => "history",
            Table::Nodes => "node",
        }
    }

    /// The XML element name wrapping a list of records.
    pub fn root_element(self) -> &'static str {
        self.segment()
    }

    /// The tab-joined allow-list of fields shown to unprivileged callers.
    pub fn public_fields(self) -> &'static str {
        match self {
            // History shares the job allow-list.
            Table::Jobs | Table::History => JOB_PUB_FIELDS,
            Table::Nodes => NODE_PUB_FIELDS,
        }
    }

    /// Fields called out as sub-elements in XML list views, besides the
    /// identifier and `dbUrl`.
    pub fn highlighted_fields(self) -> &'static [&'static str] {
        match self {
            Table::Jobs => &["name", STATUS_COL],
            Table::History => &[],
            Table::Nodes => &["host", "subnodesDbUrl"],
        }
    }

    /// How record lookups match the identifier column.
    pub fn identifier_match(self) -> IdentifierMatch {
        match self {
            Table::Jobs | Table::History => IdentifierMatch::Suffix,
            Table::Nodes => IdentifierMatch::Exact,
        }
    }

}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.sql_name().fmt(f)
    }
}

/// If `field` holds a space-delimited list, return the element name its
/// entries are rendered as in XML.
pub fn list_element(field: &str) -> Option<&'static str> {
    match field {
        "allowedVOs" => Some("allowedVO"),
        "hypervisors" => Some("hypervisor"),
        "inputFileURLs" => Some("inputFileURL"),
        "runtimeEnvironments" => Some("runtimeEnvironment"),
        _ => None,
    }
}

#[test]
fn segments_round_trip() {
    for table in [Table::Jobs, Table::History, Table::Nodes] {
        assert_eq!(Table::from_segment(table.segment()), Some(table));
    }
    assert_eq!(Table::from_segment("datums"), None);
}

#[test]
fn public_fields_end_with_db_url() {
    for table in [Table::Jobs, Table::History, Table::Nodes] {
        assert!(table.public_fields().ends_with(DBURL_COL));
    }
}
