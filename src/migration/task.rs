//! Migration task and progress types

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::dialect::Dialect;
use super::validator::ValidationReport;
use crate::gateway::{DiffOptions, TableRef};

/// Lifecycle of a migration task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    Pending,
    Running,
    Validating,
    Completed,
    Failed,
    Cancelled,
}

impl MigrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationState::Pending => "pending",
            MigrationState::Running => "running",
            MigrationState::Validating => "validating",
            MigrationState::Completed => "completed",
            MigrationState::Failed => "failed",
            MigrationState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationState::Completed | MigrationState::Failed | MigrationState::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: MigrationState) -> bool {
        use MigrationState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Validating)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Validating, Completed)
                | (Validating, Failed)
                | (Failed, Pending)
                | (Cancelled, Pending)
        )
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of migration work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlScript {
    /// Read from disk when the step runs
    File(PathBuf),
    Inline(String),
}

impl SqlScript {
    pub fn label(&self) -> String {
        match self {
            SqlScript::File(path) => path.display().to_string(),
            SqlScript::Inline(sql) => {
                let first = sql.trim().lines().next().unwrap_or_default();
                if first.chars().count() > 60 {
                    let cut: String = first.chars().take(60).collect();
                    format!("{}...", cut)
                } else {
                    first.to_string()
                }
            }
        }
    }

    pub async fn load(&self) -> std::io::Result<String> {
        match self {
            SqlScript::File(path) => tokio::fs::read_to_string(path).await,
            SqlScript::Inline(sql) => Ok(sql.clone()),
        }
    }
}

fn default_key_columns() -> Vec<String> {
    vec!["id".to_string()]
}

fn default_true() -> bool {
    true
}

/// A registered migration. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationTask {
    pub task_id: String,
    pub source: TableRef,
    pub target: TableRef,
    #[serde(default = "default_key_columns")]
    pub key_columns: Vec<String>,
    #[serde(default)]
    pub update_column: Option<String>,
    #[serde(default)]
    pub extra_columns: Vec<String>,
    #[serde(default)]
    pub scripts: Vec<SqlScript>,
    #[serde(default)]
    pub source_dialect: Option<Dialect>,
    #[serde(default)]
    pub target_dialect: Option<Dialect>,
    #[serde(default = "default_true")]
    pub validate_after_migration: bool,
    /// Allowed diff percentage
    #[serde(default)]
    pub validation_threshold: f64,
    #[serde(default)]
    pub description: Option<String>,
}

impl MigrationTask {
    pub fn new(task_id: impl Into<String>, source: TableRef, target: TableRef) -> Self {
        Self {
            task_id: task_id.into(),
            source,
            target,
            key_columns: default_key_columns(),
            update_column: None,
            extra_columns: Vec::new(),
            scripts: Vec::new(),
            source_dialect: None,
            target_dialect: None,
            validate_after_migration: true,
            validation_threshold: 0.0,
            description: None,
        }
    }

    pub fn with_script(mut self, script: SqlScript) -> Self {
        self.scripts.push(script);
        self
    }

    pub fn with_statement(self, sql: impl Into<String>) -> Self {
        self.with_script(SqlScript::Inline(sql.into()))
    }

    pub fn with_file(self, path: impl Into<PathBuf>) -> Self {
        self.with_script(SqlScript::File(path.into()))
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

    pub fn with_dialects(mut self, source: Dialect, target: Dialect) -> Self {
        self.source_dialect = Some(source);
        self.target_dialect = Some(target);
        self
    }

    pub fn with_validation(mut self, enabled: bool, threshold: f64) -> Self {
        self.validate_after_migration = enabled;
        self.validation_threshold = threshold;
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

    /// Explicit dialects win; otherwise inferred from the database URIs
    pub fn dialects(&self) -> (Option<Dialect>, Option<Dialect>) {
        (
            self.source_dialect
                .or_else(|| Dialect::from_uri(&self.source.database)),
            self.target_dialect
                .or_else(|| Dialect::from_uri(&self.target.database)),
        )
    }

    pub fn validate(&self) -> Result<(), TaskError> {
        let invalid = |reason: &str| TaskError::InvalidTask {
            task_id: self.task_id.clone(),
            reason: reason.to_string(),
        };

        if self.task_id.trim().is_empty() {
            return Err(invalid("task_id must not be empty"));
        }
        if self.source.database.is_empty() || self.source.table.is_empty() {
            return Err(invalid("source database and table are required"));
        }
        if self.target.database.is_empty() || self.target.table.is_empty() {
            return Err(invalid("target database and table are required"));
        }
        if self.key_columns.is_empty() {
            return Err(invalid("at least one key column is required"));
        }
        if !self.validation_threshold.is_finite() || self.validation_threshold < 0.0 {
            return Err(invalid("validation_threshold must be a non-negative number"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub script: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub state: MigrationState,
    pub at: DateTime<Utc>,
}

/// Observable progress of one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationProgress {
    pub task_id: String,
    pub state: MigrationState,
    pub progress_percent: f64,
    pub current_step: String,
    pub steps: Vec<StepRecord>,
    pub transitions: Vec<Transition>,
    pub last_completed_step: Option<usize>,
    pub error: Option<String>,
    pub validation: Option<ValidationReport>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl MigrationProgress {
    pub fn new(task: &MigrationTask) -> Self {
        Self {
            task_id: task.task_id.clone(),
            state: MigrationState::Pending,
            progress_percent: 0.0,
            current_step: String::new(),
            steps: task
                .scripts
                .iter()
                .enumerate()
                .map(|(index, script)| StepRecord {
                    index,
                    script: script.label(),
                    status: StepStatus::Pending,
                    error: None,
                    started_at: None,
                    finished_at: None,
                })
                .collect(),
            transitions: vec![Transition {
                state: MigrationState::Pending,
                at: Utc::now(),
            }],
            last_completed_step: None,
            error: None,
            validation: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// States visited in order
    pub fn state_history(&self) -> Vec<MigrationState> {
        self.transitions.iter().map(|t| t.state).collect()
    }

    /// Move to `next`, refusing edges the state machine does not allow
    pub(crate) fn transition(&mut self, next: MigrationState) -> Result<(), TaskError> {
        if !self.state.can_transition_to(next) {
            return Err(TaskError::InvalidState {
                task_id: self.task_id.clone(),
                state: self.state,
                action: format!("move to {}", next),
            });
        }
        let now = Utc::now();
        self.state = next;
        self.transitions.push(Transition {
            state: next,
            at: now,
        });
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    /// Mark every step that has not run as skipped
    pub(crate) fn skip_remaining(&mut self) {
        for step in &mut self.steps {
            if step.status == StepStatus::Pending {
                step.status = StepStatus::Skipped;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("Migration task not found: {0}")]
    NotFound(String),

    #[error("Migration task already exists: {0}")]
    DuplicateTask(String),

    #[error("Migration task {task_id} is {state}, cannot {action}")]
    InvalidState {
        task_id: String,
        state: MigrationState,
        action: String,
    },

    #[error("Invalid migration task {task_id}: {reason}")]
    InvalidTask { task_id: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task() -> MigrationTask {
        MigrationTask::new(
            "m1",
            TableRef::new("mysql://src/app", "users"),
            TableRef::new("postgresql://dst/app", "users"),
        )
    }

    #[test]
    fn test_state_machine_edges() {
        use MigrationState::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Validating));
        assert!(Validating.can_transition_to(Completed));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Validating.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(Completed.is_terminal() && Cancelled.is_terminal());
        assert!(!Validating.is_terminal());
    }

    #[test]
    fn test_dialect_inference() {
        assert_eq!(
            task().dialects(),
            (Some(Dialect::Mysql), Some(Dialect::Postgresql))
        );
        let explicit = task().with_dialects(Dialect::Oracle, Dialect::Snowflake);
        assert_eq!(
            explicit.dialects(),
            (Some(Dialect::Oracle), Some(Dialect::Snowflake))
        );
    }

    #[test]
    fn test_validation_rules() {
        assert!(task().validate().is_ok());
        assert!(matches!(
            task().with_key_columns(Vec::<String>::new()).validate(),
            Err(TaskError::InvalidTask { .. })
        ));
        assert!(task().with_validation(true, -1.0).validate().is_err());
        assert!(task().with_validation(true, f64::NAN).validate().is_err());
    }

    #[test]
    fn test_deserialize_defaults() {
        let task: MigrationTask = serde_json::from_value(json!({
            "task_id": "m2",
            "source": {"database": "mysql://a", "table": "t"},
            "target": {"database": "postgres://b", "table": "t"},
            "scripts": [{"inline": "DELETE FROM t"}, {"file": "/tmp/x.sql"}]
        }))
        .unwrap();
        assert_eq!(task.key_columns, vec!["id".to_string()]);
        assert!(task.validate_after_migration);
        assert_eq!(task.validation_threshold, 0.0);
        assert_eq!(task.scripts.len(), 2);
        assert_eq!(task.scripts[1].label(), "/tmp/x.sql");
    }

    #[test]
    fn test_progress_starts_pending() {
        let task = task().with_statement("DELETE FROM t").with_statement("VACUUM");
        let progress = MigrationProgress::new(&task);
        assert_eq!(progress.state, MigrationState::Pending);
        assert_eq!(progress.steps.len(), 2);
        assert_eq!(progress.steps[1].script, "VACUUM");
        assert_eq!(progress.state_history(), vec![MigrationState::Pending]);
    }

    #[test]
    fn test_illegal_transition_is_refused() {
        let mut progress = MigrationProgress::new(&task().with_statement("SELECT 1"));
        progress.transition(MigrationState::Running).unwrap();
        progress.transition(MigrationState::Validating).unwrap();

        let err = progress.transition(MigrationState::Cancelled).unwrap_err();
        assert!(matches!(
            err,
            TaskError::InvalidState { state: MigrationState::Validating, .. }
        ));
        assert_eq!(progress.state, MigrationState::Validating);
        assert!(progress.finished_at.is_none());
        assert_eq!(
            progress.state_history(),
            vec![
                MigrationState::Pending,
                MigrationState::Running,
                MigrationState::Validating,
            ]
        );

        progress.transition(MigrationState::Completed).unwrap();
        assert!(progress.transition(MigrationState::Pending).is_err());
    }
}
