//! Migration orchestration
//!
//! Tasks move through `pending -> running -> validating -> completed`, or end
//! in `failed` / `cancelled`. Scripts are translated between SQL dialects
//! before they run, and the migrated table is checked against its source
//! with a keyed diff.

pub mod dialect;
pub mod executor;
pub mod orchestrator;
pub mod store;
pub mod task;
pub mod validator;

pub use dialect::{Dialect, RuleTableTranslator, SqlTranslator, TranslateError};
pub use executor::{ExecError, SqlExecutor};
pub use orchestrator::MigrationOrchestrator;
pub use store::MigrationTaskStore;
pub use task::{
    MigrationProgress, MigrationState, MigrationTask, SqlScript, StepRecord, StepStatus,
    TaskError, Transition,
};
pub use validator::{
    BatchSummary, MigrationValidator, ValidationOutcome, ValidationReport, ValidationRequest,
};
