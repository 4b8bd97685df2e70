//! Registry of migration tasks and their progress

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use super::task::{MigrationProgress, MigrationState, MigrationTask, TaskError};

struct TaskEntry {
    task: MigrationTask,
    progress: MigrationProgress,
    cancel: Arc<AtomicBool>,
}

/// Thread-safe task store. All state transitions go through here so they are
/// checked and applied under one lock.
pub struct MigrationTaskStore {
    tasks: Mutex<HashMap<String, TaskEntry>>,
}

impl MigrationTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn create(&self, task: MigrationTask) -> Result<(), TaskError> {
        task.validate()?;
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&task.task_id) {
            return Err(TaskError::DuplicateTask(task.task_id));
        }
        tracing::info!(task_id = %task.task_id, scripts = task.scripts.len(), "Migration task created");
        let progress = MigrationProgress::new(&task);
        tasks.insert(
            task.task_id.clone(),
            TaskEntry {
                task,
                progress,
                cancel: Arc::new(AtomicBool::new(false)),
            },
        );
        Ok(())
    }

    pub fn get(&self, task_id: &str) -> Option<MigrationTask> {
        self.tasks.lock().get(task_id).map(|e| e.task.clone())
    }

    /// All tasks ordered by id
    pub fn list(&self) -> Vec<MigrationTask> {
        let mut tasks: Vec<MigrationTask> =
            self.tasks.lock().values().map(|e| e.task.clone()).collect();
        tasks.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        tasks
    }

    pub fn progress(&self, task_id: &str) -> Option<MigrationProgress> {
        self.tasks.lock().get(task_id).map(|e| e.progress.clone())
    }

    /// Claim a pending task for execution: PENDING -> RUNNING with a fresh
    /// progress record and cancellation flag.
    pub fn begin(&self, task_id: &str) -> Result<(MigrationTask, Arc<AtomicBool>), TaskError> {
        let mut tasks = self.tasks.lock();
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
        if entry.progress.state != MigrationState::Pending {
            return Err(invalid_state(task_id, entry.progress.state, "execute"));
        }

        let mut progress = MigrationProgress::new(&entry.task);
        progress.transitions = entry.progress.transitions.clone();
        progress.started_at = Some(Utc::now());
        progress.current_step = "Starting migration".to_string();
        progress.transition(MigrationState::Running)?;
        entry.progress = progress;

        entry.cancel = Arc::new(AtomicBool::new(false));
        Ok((entry.task.clone(), Arc::clone(&entry.cancel)))
    }

    /// Apply `f` to a task's progress under the store lock
    pub(crate) fn update<R>(
        &self,
        task_id: &str,
        f: impl FnOnce(&mut MigrationProgress) -> R,
    ) -> Option<R> {
        self.tasks.lock().get_mut(task_id).map(|e| f(&mut e.progress))
    }

    /// Cancel a task.
    ///
    /// Pending tasks are cancelled at once. Running tasks are flagged and stop
    /// at their next step boundary; the returned state tells which happened.
    pub fn cancel(&self, task_id: &str) -> Result<MigrationState, TaskError> {
        let mut tasks = self.tasks.lock();
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;

        match entry.progress.state {
            MigrationState::Pending => {
                entry.progress.transition(MigrationState::Cancelled)?;
                entry.progress.current_step = "Cancelled".to_string();
                entry.progress.skip_remaining();
                tracing::info!(task_id = %task_id, "Pending migration cancelled");
                Ok(MigrationState::Cancelled)
            }
            MigrationState::Running => {
                entry.cancel.store(true, Ordering::SeqCst);
                tracing::info!(task_id = %task_id, "Cancellation requested for running migration");
                Ok(MigrationState::Running)
            }
            state => Err(invalid_state(task_id, state, "cancel")),
        }
    }

    /// FAILED or CANCELLED -> PENDING with a fresh progress record
    pub fn reset(&self, task_id: &str) -> Result<(), TaskError> {
        let mut tasks = self.tasks.lock();
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;

        let state = entry.progress.state;
        if !state.can_transition_to(MigrationState::Pending) {
            return Err(invalid_state(task_id, state, "reset"));
        }
        entry.progress = MigrationProgress::new(&entry.task);
        entry.cancel = Arc::new(AtomicBool::new(false));
        tracing::info!(task_id = %task_id, "Migration task reset");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl Default for MigrationTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid_state(task_id: &str, state: MigrationState, action: &str) -> TaskError {
    TaskError::InvalidState {
        task_id: task_id.to_string(),
        state,
        action: action.to_string(),
    }
}
