use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gateway::SchemaChanges;
use crate::monitor::{MonitorResult, MonitorRule, Severity};

/// A threshold breach handed to alert channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub rule_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub diff_count: u64,
    pub diff_percent: f64,
    pub row_count_table1: u64,
    pub row_count_table2: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_changes: Option<SchemaChanges>,
}

impl AlertEvent {
    pub fn from_result(rule: &MonitorRule, result: &MonitorResult) -> Self {
        Self {
            rule_name: rule.name.clone(),
            description: rule.description.clone(),
            severity: rule.severity,
            timestamp: result.timestamp,
            diff_count: result.diff_count,
            diff_percent: result.diff_percent,
            row_count_table1: result.row_count_table1,
            row_count_table2: result.row_count_table2,
            schema_changes: result.schema_changes.clone(),
        }
    }

    pub fn subject(&self) -> String {
        format!("[{}] Data monitor alert: {}", self.severity, self.rule_name)
    }

    /// Plain-text body shared by log, email and chat channels
    pub fn summary(&self) -> String {
        let mut text = format!(
            "Rule: {}\nSeverity: {}\nDiff count: {}\nDiff percent: {:.2}%\nTable 1 rows: {}\nTable 2 rows: {}\nTime: {}",
            self.rule_name,
            self.severity,
            self.diff_count,
            self.diff_percent,
            self.row_count_table1,
            self.row_count_table2,
            self.timestamp.to_rfc3339()
        );
        if let Some(description) = &self.description {
            text.push_str(&format!("\nDescription: {}", description));
        }
        if let Some(changes) = &self.schema_changes {
            text.push_str(&format!(
                "\nAdded columns: {:?}\nRemoved columns: {:?}\nType changes: {:?}",
                changes.added, changes.removed, changes.type_changed
            ));
        }
        text
    }
}
