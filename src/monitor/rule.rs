//! Monitor rule and result types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::schedule::Schedule;
use crate::gateway::{DiffOptions, SchemaChanges, TableRef};

/// What a rule measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    /// Key-matched row diff between two tables
    DataDiff,
    /// Row count difference between two tables
    RowCount,
    /// Column layout changes of one table
    SchemaChange,
}

/// Which measured quantity a threshold applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKind {
    DiffCount,
    DiffPercent,
    RowCountDiff,
}

/// Comparison operator for thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Gte),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Lte),
            "==" | "=" => Ok(Operator::Eq),
            "!=" | "<>" => Ok(Operator::Ne),
            other => Err(RuleError::InvalidRule(format!("unknown operator '{}'", other))),
        }
    }
}

/// Threshold a rule's measurement is compared against
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub kind: ThresholdKind,
    #[serde(default = "default_operator")]
    pub operator: Operator,
    pub value: f64,
}

fn default_operator() -> Operator {
    Operator::Gt
}

/// Alert severity carried by triggered rules
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("info"),
            Severity::Warning => f.write_str("warning"),
            Severity::Critical => f.write_str("critical"),
        }
    }
}

/// Monitor rule definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorRule {
    /// Unique rule name
    pub name: String,
    pub kind: MonitorKind,
    /// First table (the only one for schema checks)
    pub source: TableRef,
    /// Second table
    #[serde(default)]
    pub target: Option<TableRef>,
    /// Row identity for diffing
    #[serde(default = "default_key_columns")]
    pub key_columns: Vec<String>,
    #[serde(default)]
    pub update_column: Option<String>,
    #[serde(default)]
    pub extra_columns: Vec<String>,
    /// A rule without a threshold never triggers
    #[serde(default)]
    pub threshold: Option<Threshold>,
    /// Cron-like schedule; unscheduled rules only run on demand
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_key_columns() -> Vec<String> {
    vec!["id".to_string()]
}

impl MonitorRule {
    /// Create a rule with `id` as key column, no threshold and no schedule
    pub fn new(name: impl Into<String>, kind: MonitorKind, source: TableRef) -> Self {
        Self {
            name: name.into(),
            kind,
            source,
            target: None,
            key_columns: default_key_columns(),
            update_column: None,
            extra_columns: Vec::new(),
            threshold: None,
            schedule: None,
            enabled: true,
            severity: Severity::default(),
            description: None,
            tags: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: TableRef) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_key_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_extra_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_threshold(mut self, kind: ThresholdKind, operator: Operator, value: f64) -> Self {
        self.threshold = Some(Threshold {
            kind,
            operator,
            value,
        });
        self
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            key_columns: self.key_columns.clone(),
            update_column: self.update_column.clone(),
            extra_columns: self.extra_columns.clone(),
        }
    }

    /// Reject definitions that could never execute
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.name.trim().is_empty() {
            return Err(RuleError::InvalidRule("rule name is empty".to_string()));
        }

        match self.kind {
            MonitorKind::DataDiff | MonitorKind::RowCount => {
                if self.key_columns.is_empty() {
                    return Err(RuleError::InvalidRule(format!(
                        "rule '{}' needs at least one key column",
                        self.name
                    )));
                }
                if self.kind == MonitorKind::DataDiff && self.target.is_none() {
                    return Err(RuleError::InvalidRule(format!(
                        "data diff rule '{}' needs a target table",
                        self.name
                    )));
                }
            }
            MonitorKind::SchemaChange => {}
        }

        if let Some(threshold) = &self.threshold {
            if !threshold.value.is_finite() {
                return Err(RuleError::InvalidRule(format!(
                    "rule '{}' has a non-finite threshold",
                    self.name
                )));
            }
        }

        if let Some(expr) = &self.schedule {
            Schedule::parse(expr).map_err(|e| {
                RuleError::InvalidRule(format!("rule '{}': {}", self.name, e))
            })?;
        }

        Ok(())
    }
}

/// Outcome of one rule execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorResult {
    pub rule_name: String,
    pub timestamp: DateTime<Utc>,
    /// False when the data could not be obtained
    pub success: bool,
    /// Threshold comparison held; always false on failure
    pub triggered: bool,
    pub diff_count: u64,
    pub diff_percent: f64,
    pub row_count_table1: u64,
    pub row_count_table2: u64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_changes: Option<SchemaChanges>,
}

impl MonitorResult {
    /// Successful, untriggered result with zeroed measurements
    pub fn empty(rule_name: impl Into<String>) -> Self {
        Self {
            rule_name: rule_name.into(),
            timestamp: Utc::now(),
            success: true,
            triggered: false,
            diff_count: 0,
            diff_percent: 0.0,
            row_count_table1: 0,
            row_count_table2: 0,
            duration_ms: 0,
            error: None,
            schema_changes: None,
        }
    }

    pub fn failed(rule_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::empty(rule_name)
        }
    }

    /// `|row_count_table1 - row_count_table2|`
    pub fn row_count_diff(&self) -> u64 {
        self.row_count_table1.abs_diff(self.row_count_table2)
    }
}

/// Rule registry errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleError {
    #[error("Rule already exists: {0}")]
    DuplicateName(String),

    #[error("Rule not found: {0}")]
    NotFound(String),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),
}
