//! Data consistency monitoring
//!
//! Rules compare table pairs (or a single table's schema) through the diff
//! gateway. Every run is recorded in the [`RuleStore`]; runs that breach the
//! rule's threshold are handed to the alert dispatcher. The
//! [`MonitorScheduler`] fires rules on their cron schedules.

pub mod rule;
pub mod runner;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod threshold;

pub use rule::{
    MonitorKind, MonitorResult, MonitorRule, Operator, RuleError, Severity, Threshold,
    ThresholdKind,
};
pub use runner::Monitor;
pub use schedule::{next_fire_time, Schedule, ScheduleError};
pub use scheduler::{MonitorScheduler, SchedulerConfig};
pub use store::{RuleStore, DEFAULT_HISTORY_LIMIT};
pub use threshold::{evaluate, is_triggered};
