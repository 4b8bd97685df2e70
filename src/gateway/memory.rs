//! In-process gateway backed by plain row maps.
//!
//! Used by tests and by the server when no external diff service is
//! configured. It also implements [`SqlExecutor`] by journaling statements.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use super::{DiffGateway, DiffOptions, DiffStats, GatewayError, SchemaSnapshot, TableRef};
use crate::migration::executor::{ExecError, SqlExecutor};

pub type Row = HashMap<String, Value>;

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    schema: SchemaSnapshot,
    rows: Vec<Row>,
}

/// In-memory tables keyed by [`TableRef`]
#[derive(Default)]
pub struct MemoryGateway {
    tables: DashMap<TableRef, MemoryTable>,
    /// Databases that fail every call
    unreachable: DashMap<String, String>,
    /// Artificial per-database latency
    latency: DashMap<String, Duration>,
    /// Executed (database, sql) pairs in order
    journal: Mutex<Vec<(String, String)>>,
    /// Statements containing one of these fragments fail on execute
    failing_fragments: Mutex<Vec<String>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a table with its rows
    pub fn put_table(&self, table: TableRef, rows: Vec<Row>) {
        let schema = infer_schema(&rows);
        self.tables.insert(table, MemoryTable { schema, rows });
    }

    /// Append a row to an existing (or new) table
    pub fn insert_row(&self, table: &TableRef, row: Row) {
        let mut entry = self.tables.entry(table.clone()).or_default();
        entry.rows.push(row);
        if entry.schema.columns.is_empty() {
            entry.schema = infer_schema(&entry.rows);
        }
    }

    /// Override the schema reported for a table
    pub fn set_schema(&self, table: &TableRef, schema: SchemaSnapshot) {
        self.tables.entry(table.clone()).or_default().schema = schema;
    }

    /// Make every call against `database` fail with [`GatewayError::Unreachable`]
    pub fn set_unreachable(&self, database: impl Into<String>, reason: impl Into<String>) {
        self.unreachable.insert(database.into(), reason.into());
    }

    pub fn set_reachable(&self, database: &str) {
        self.unreachable.remove(database);
    }

    /// Delay every call against `database`
    pub fn set_latency(&self, database: impl Into<String>, latency: Duration) {
        self.latency.insert(database.into(), latency);
    }

    /// Make statements containing `fragment` fail on execute
    pub fn fail_statements_containing(&self, fragment: impl Into<String>) {
        self.failing_fragments.lock().push(fragment.into());
    }

    /// Statements executed so far
    pub fn executed(&self) -> Vec<(String, String)> {
        self.journal.lock().clone()
    }

    async fn enter(&self, database: &str) -> Result<(), GatewayError> {
        let latency = self.latency.get(database).map(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(reason) = self.unreachable.get(database) {
            return Err(GatewayError::Unreachable(format!(
                "{}: {}",
                database,
                reason.value()
            )));
        }
        Ok(())
    }

    fn table(&self, table: &TableRef) -> Result<MemoryTable, GatewayError> {
        self.tables
            .get(table)
            .map(|t| t.clone())
            .ok_or_else(|| GatewayError::TableNotFound(table.to_string()))
    }
}

#[async_trait]
impl DiffGateway for MemoryGateway {
    async fn row_count(&self, table: &TableRef) -> Result<u64, GatewayError> {
        self.enter(&table.database).await?;
        Ok(self.table(table)?.rows.len() as u64)
    }

    async fn diff_keyed(
        &self,
        table_a: &TableRef,
        table_b: &TableRef,
        options: &DiffOptions,
    ) -> Result<DiffStats, GatewayError> {
        self.enter(&table_a.database).await?;
        self.enter(&table_b.database).await?;

        let a = self.table(table_a)?;
        let b = self.table(table_b)?;
        let compared = options.compared_columns();

        let index_a = index_rows(&a.rows, &options.key_columns);
        let index_b = index_rows(&b.rows, &options.key_columns);

        let mut diff_count = 0u64;
        for (key, row_a) in &index_a {
            match index_b.get(key) {
                None => diff_count += 1,
                Some(row_b) => {
                    let differs = compared.iter().any(|c| row_a.get(c) != row_b.get(c));
                    if differs {
                        diff_count += 1;
                    }
                }
            }
        }
        let keys_a: HashSet<&String> = index_a.keys().collect();
        diff_count += index_b.keys().filter(|k| !keys_a.contains(k)).count() as u64;

        Ok(DiffStats {
            diff_count,
            rows_a: a.rows.len() as u64,
            rows_b: b.rows.len() as u64,
        })
    }

    async fn schema_snapshot(&self, table: &TableRef) -> Result<SchemaSnapshot, GatewayError> {
        self.enter(&table.database).await?;
        Ok(self.table(table)?.schema)
    }
}

#[async_trait]
impl SqlExecutor for MemoryGateway {
    async fn execute(&self, database: &str, sql: &str) -> Result<(), ExecError> {
        self.enter(database)
            .await
            .map_err(|e| ExecError::Connection(e.to_string()))?;

        let failing = self
            .failing_fragments
            .lock()
            .iter()
            .find(|f| sql.contains(f.as_str()))
            .cloned();
        if let Some(fragment) = failing {
            return Err(ExecError::Statement(format!(
                "statement rejected near '{}'",
                fragment
            )));
        }

        self.journal
            .lock()
            .push((database.to_string(), sql.to_string()));
        Ok(())
    }
}

fn index_rows<'a>(rows: &'a [Row], key_columns: &[String]) -> HashMap<String, &'a Row> {
    rows.iter()
        .map(|row| {
            let key = key_columns
                .iter()
                .map(|c| row.get(c).map(|v| v.to_string()).unwrap_or_default())
                .collect::<Vec<_>>()
                .join("\u{1f}");
            (key, row)
        })
        .collect()
}

fn infer_schema(rows: &[Row]) -> SchemaSnapshot {
    let mut schema = SchemaSnapshot::default();
    for row in rows {
        for (column, value) in row {
            schema
                .columns
                .entry(column.clone())
                .or_insert_with(|| json_type_name(value).to_string());
        }
    }
    schema
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "double",
        Value::Number(_) => "bigint",
        Value::String(_) => "text",
        Value::Array(_) => "array",
        Value::Object(_) => "json",
    }
}

/// Build a row from `(column, value)` pairs
pub fn row<I, K>(pairs: I) -> Row
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
