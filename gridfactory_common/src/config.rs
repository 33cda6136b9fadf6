//! Gateway configuration.
//!
//! The original service took these as server directives and stashed them in
//! globals shared across requests. Here they are one immutable struct,
//! extracted from the server's figment at startup and passed explicitly to
//! whatever needs them.

use serde::Deserialize;

use crate::tables::Table;

/// Configuration consumed by the gateway core.
#[derive(Clone, Debug, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the DB web service, used to synthesize `dbUrl` values.
    /// A table segment and the record's UUID are appended to this.
    #[serde(default = "default_db_base_url")]
    pub db_base_url: String,

    /// Base URL of the XSL stylesheet directory. When set, XML output
    /// carries an `xml-stylesheet` processing instruction pointing at
    /// `<xsl_base_url>/<segment>.xsl`.
    #[serde(default)]
    pub xsl_base_url: Option<String>,

    /// Upper bound on the number of rows rendered for a list request.
    /// Exceeding it truncates the output and logs a warning.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

fn default_db_base_url() -> String {
    "https://localhost/db/".to_string()
}

fn default_max_rows() -> usize {
    1000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            db_base_url: default_db_base_url(),
            xsl_base_url: None,
            max_rows: default_max_rows(),
        }
    }
}

impl GatewayConfig {
    /// The base URL for records of `table`, always ending in `/`.
    pub fn table_base_url(&self, table: Table) -> String {
        let base = self.db_base_url.trim_end_matches('/');
        format!("{}/{}/", base, table.segment())
    }
}

#[test]
fn table_base_url_normalizes_slashes() {
    let mut config = GatewayConfig::default();
    config.db_base_url = "https://host/db".to_string();
    assert_eq!(config.table_base_url(Table::Jobs), "https://host/db/jobs/");
    config.db_base_url = "https://host/db/".to_string();
    assert_eq!(config.table_base_url(Table::Nodes), "https://host/db/nodes/");
}
