//! Diff engine gateway
//!
//! The monitor and the migration validator never talk to databases directly.
//! They go through [`DiffGateway`], which returns row counts, keyed diff
//! counts and schema snapshots for table references. The row-diff algorithm
//! itself lives behind this trait.

pub mod memory;
pub mod remote;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::MemoryGateway;
pub use remote::RemoteGateway;

/// A table inside a data source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Connection descriptor (e.g. `postgresql://host/db`)
    pub database: String,
    /// Table name, optionally schema-qualified
    pub table: String,
}

impl TableRef {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.database, self.table)
    }
}

/// Columns that drive a keyed diff
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffOptions {
    /// Row identity
    pub key_columns: Vec<String>,
    /// Optional last-modified column
    #[serde(default)]
    pub update_column: Option<String>,
    /// Non-key columns compared for equality
    #[serde(default)]
    pub extra_columns: Vec<String>,
}

impl DiffOptions {
    pub fn new(key_columns: Vec<String>) -> Self {
        Self {
            key_columns,
            update_column: None,
            extra_columns: Vec::new(),
        }
    }

    /// All compared columns (update column and extra columns), without keys
    pub fn compared_columns(&self) -> Vec<String> {
        let mut columns = Vec::new();
        if let Some(update) = &self.update_column {
            columns.push(update.clone());
        }
        for column in &self.extra_columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        columns
    }
}

/// Raw output of a keyed diff
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    /// Rows missing on either side or differing in a compared column
    pub diff_count: u64,
    pub rows_a: u64,
    pub rows_b: u64,
}

impl DiffStats {
    /// Diff count relative to the larger table, in percent.
    ///
    /// Two empty tables are 0% different.
    pub fn diff_percent(&self) -> f64 {
        percent_of_larger(self.diff_count, self.rows_a, self.rows_b)
    }
}

/// `part / max(a, b) * 100`, or 0 when both sides are empty
pub fn percent_of_larger(part: u64, a: u64, b: u64) -> f64 {
    let larger = a.max(b);
    if larger == 0 {
        0.0
    } else {
        part as f64 / larger as f64 * 100.0
    }
}

/// Column name to column type, ordered by name so snapshots compare stably
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub columns: BTreeMap<String, String>,
}

impl SchemaSnapshot {
    pub fn new<I, K, V>(columns: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            columns: columns
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Compare against a newer snapshot
    pub fn changes_to(&self, newer: &SchemaSnapshot) -> SchemaChanges {
        let added = newer
            .columns
            .keys()
            .filter(|c| !self.columns.contains_key(*c))
            .cloned()
            .collect();
        let removed = self
            .columns
            .keys()
            .filter(|c| !newer.columns.contains_key(*c))
            .cloned()
            .collect();
        let type_changed = self
            .columns
            .iter()
            .filter_map(|(name, old_type)| match newer.columns.get(name) {
                Some(new_type) if new_type != old_type => Some(name.clone()),
                _ => None,
            })
            .collect();

        SchemaChanges {
            added,
            removed,
            type_changed,
        }
    }
}

/// Differences between two schema snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub type_changed: Vec<String>,
}

impl SchemaChanges {
    pub fn count(&self) -> u64 {
        (self.added.len() + self.removed.len() + self.type_changed.len()) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

/// Access to row counts, keyed diffs and schemas of remote tables.
///
/// Implementations must tolerate concurrent calls; connection pooling and
/// backpressure are their concern.
#[async_trait]
pub trait DiffGateway: Send + Sync {
    /// Number of rows in a table
    async fn row_count(&self, table: &TableRef) -> Result<u64, GatewayError>;

    /// Key-matched diff between two tables
    async fn diff_keyed(
        &self,
        table_a: &TableRef,
        table_b: &TableRef,
        options: &DiffOptions,
    ) -> Result<DiffStats, GatewayError>;

    /// Current column layout of a table
    async fn schema_snapshot(&self, table: &TableRef) -> Result<SchemaSnapshot, GatewayError>;
}

/// Gateway errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Data source unreachable: {0}")]
    Unreachable(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Decode error: {0}")]
    Decode(String),
}
