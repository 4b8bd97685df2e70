//! Migration execution
//!
//! A task runs its scripts in order against the target database, each one
//! translated to the target dialect first, then optionally validates the
//! result with a keyed diff. Progress is published through the task store
//! after every step so callers can poll it while the task runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

use super::dialect::{RuleTableTranslator, SqlTranslator};
use super::executor::SqlExecutor;
use super::store::MigrationTaskStore;
use super::task::{MigrationProgress, MigrationState, MigrationTask, StepStatus, TaskError};
use super::validator::{MigrationValidator, ValidationOutcome};
use crate::gateway::DiffGateway;

/// Share of the progress bar taken by scripts when validation follows
const SCRIPTS_SHARE_WITH_VALIDATION: f64 = 80.0;

pub struct MigrationOrchestrator {
    store: Arc<MigrationTaskStore>,
    translator: Arc<dyn SqlTranslator>,
    executor: Arc<dyn SqlExecutor>,
    validator: MigrationValidator,
}

impl MigrationOrchestrator {
    pub fn new(
        store: Arc<MigrationTaskStore>,
        gateway: Arc<dyn DiffGateway>,
        executor: Arc<dyn SqlExecutor>,
    ) -> Self {
        Self {
            store,
            translator: Arc::new(RuleTableTranslator::new()),
            executor,
            validator: MigrationValidator::new(gateway),
        }
    }

    pub fn with_translator(mut self, translator: Arc<dyn SqlTranslator>) -> Self {
        self.translator = translator;
        self
    }

    pub fn store(&self) -> &Arc<MigrationTaskStore> {
        &self.store
    }

    pub fn validator(&self) -> &MigrationValidator {
        &self.validator
    }

    pub fn create(&self, task: MigrationTask) -> Result<(), TaskError> {
        self.store.create(task)
    }

    pub fn list(&self) -> Vec<MigrationTask> {
        self.store.list()
    }

    pub fn get(&self, task_id: &str) -> Option<MigrationTask> {
        self.store.get(task_id)
    }

    pub fn progress(&self, task_id: &str) -> Option<MigrationProgress> {
        self.store.progress(task_id)
    }

    pub fn cancel(&self, task_id: &str) -> Result<MigrationState, TaskError> {
        self.store.cancel(task_id)
    }

    pub fn reset(&self, task_id: &str) -> Result<(), TaskError> {
        self.store.reset(task_id)
    }

    /// Run a pending task to a terminal state and return its final progress
    pub async fn execute(&self, task_id: &str) -> Result<MigrationProgress, TaskError> {
        let (task, cancel) = self.store.begin(task_id)?;
        self.run(&task, &cancel).await;
        self.store
            .progress(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    /// Claim a pending task and run it on a background task
    pub fn spawn(
        self: &Arc<Self>,
        task_id: &str,
    ) -> Result<JoinHandle<MigrationProgress>, TaskError> {
        let (task, cancel) = self.store.begin(task_id)?;
        let orchestrator = Arc::clone(self);
        Ok(tokio::spawn(async move {
            orchestrator.run(&task, &cancel).await;
            orchestrator
                .store
                .progress(&task.task_id)
                .unwrap_or_else(|| MigrationProgress::new(&task))
        }))
    }

    async fn run(&self, task: &MigrationTask, cancel: &AtomicBool) {
        let id = task.task_id.as_str();
        tracing::info!(task_id = %id, scripts = task.scripts.len(), "Migration started");

        let scripts_share = if task.validate_after_migration {
            SCRIPTS_SHARE_WITH_VALIDATION
        } else {
            100.0
        };
        let total = task.scripts.len();
        let (source_dialect, target_dialect) = task.dialects();

        for (index, script) in task.scripts.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                self.finish_cancelled(id);
                return;
            }

            let label = script.label();
            self.store.update(id, |p| {
                p.current_step = format!("Executing step {}/{}: {}", index + 1, total, label);
                let step = &mut p.steps[index];
                step.status = StepStatus::Running;
                step.started_at = Some(Utc::now());
            });
            tracing::debug!(task_id = %id, step = index, script = %label, "Executing migration step");

            let outcome = async {
                let sql = script
                    .load()
                    .await
                    .map_err(|e| format!("Failed to read script {}: {}", label, e))?;
                let sql = match (source_dialect, target_dialect) {
                    (Some(source), Some(target)) => self
                        .translator
                        .translate(&sql, source, target)
                        .map_err(|e| format!("Failed to translate {}: {}", label, e))?,
                    _ => sql,
                };
                self.executor
                    .execute(&task.target.database, &sql)
                    .await
                    .map_err(|e| format!("Step {} failed: {}", index + 1, e))
            }
            .await;

            if let Err(error) = outcome {
                tracing::error!(task_id = %id, step = index, error = %error, "Migration step failed");
                self.settle(id, |p| {
                    p.transition(MigrationState::Failed)?;
                    let step = &mut p.steps[index];
                    step.status = StepStatus::Failed;
                    step.error = Some(error.clone());
                    step.finished_at = Some(Utc::now());
                    p.skip_remaining();
                    p.error = Some(error);
                    p.current_step = format!("Failed at step {}/{}", index + 1, total);
                    Ok(())
                });
                return;
            }

            self.store.update(id, |p| {
                let step = &mut p.steps[index];
                step.status = StepStatus::Completed;
                step.finished_at = Some(Utc::now());
                p.last_completed_step = Some(index);
                p.progress_percent = scripts_share * (index + 1) as f64 / total as f64;
            });
        }

        if !task.validate_after_migration {
            self.finish_scripts(id, cancel, MigrationState::Completed);
            return;
        }
        if !self.finish_scripts(id, cancel, MigrationState::Validating) {
            return;
        }

        let outcome = self
            .validator
            .validate(
                &task.source,
                &task.target,
                &task.diff_options(),
                task.validation_threshold,
            )
            .await;

        match outcome {
            ValidationOutcome::Passed(report) => {
                self.store.update(id, |p| p.validation = Some(report));
                self.finish_completed(id);
            }
            ValidationOutcome::Discrepancy(report) => {
                let error = format!("Validation failed: {}", report.discrepancy());
                tracing::warn!(task_id = %id, error = %error, "Migration validation failed");
                self.settle(id, |p| {
                    p.transition(MigrationState::Failed)?;
                    p.validation = Some(report);
                    p.error = Some(error);
                    p.current_step = "Validation failed".to_string();
                    Ok(())
                });
            }
            ValidationOutcome::Unreachable(e) => {
                let error = format!("Validation could not run: {}", e);
                tracing::error!(task_id = %id, error = %error, "Migration validation failed");
                self.settle(id, |p| {
                    p.transition(MigrationState::Failed)?;
                    p.error = Some(error);
                    p.current_step = "Validation failed".to_string();
                    Ok(())
                });
            }
        }
    }

    /// Leave RUNNING once every script is done. The cancellation flag is read
    /// under the store lock so a cancel cannot slip in between the check and
    /// the transition. Returns false when the task was cancelled instead.
    fn finish_scripts(&self, task_id: &str, cancel: &AtomicBool, next: MigrationState) -> bool {
        let cancelled = self.store.update(task_id, |p| -> Result<bool, TaskError> {
            if cancel.load(Ordering::SeqCst) {
                p.transition(MigrationState::Cancelled)?;
                p.skip_remaining();
                p.current_step = "Cancelled".to_string();
                return Ok(true);
            }
            p.transition(next)?;
            if next == MigrationState::Completed {
                p.progress_percent = 100.0;
                p.current_step = "Migration completed".to_string();
            } else {
                p.progress_percent = SCRIPTS_SHARE_WITH_VALIDATION;
                p.current_step = "Validating migrated data".to_string();
            }
            Ok(false)
        });

        match cancelled {
            Some(Ok(true)) => {
                tracing::info!(task_id = %task_id, "Migration cancelled");
                false
            }
            Some(Ok(false)) => {
                if next == MigrationState::Completed {
                    tracing::info!(task_id = %task_id, "Migration completed");
                }
                true
            }
            Some(Err(e)) => {
                tracing::error!(task_id = %task_id, error = %e, "Rejected migration state change");
                false
            }
            None => false,
        }
    }

    fn finish_completed(&self, task_id: &str) {
        self.settle(task_id, |p| {
            p.transition(MigrationState::Completed)?;
            p.progress_percent = 100.0;
            p.current_step = "Migration completed".to_string();
            Ok(())
        });
        tracing::info!(task_id = %task_id, "Migration completed");
    }

    fn finish_cancelled(&self, task_id: &str) {
        self.settle(task_id, |p| {
            p.transition(MigrationState::Cancelled)?;
            p.skip_remaining();
            p.current_step = "Cancelled".to_string();
            Ok(())
        });
        tracing::info!(task_id = %task_id, "Migration cancelled");
    }

    /// Apply a state change; a refused edge is logged and leaves progress as is
    fn settle(
        &self,
        task_id: &str,
        f: impl FnOnce(&mut MigrationProgress) -> Result<(), TaskError>,
    ) {
        if let Some(Err(e)) = self.store.update(task_id, f) {
            tracing::error!(task_id = %task_id, error = %e, "Rejected migration state change");
        }
    }
}
