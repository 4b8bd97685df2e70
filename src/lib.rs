//! driftwatch: cross-database consistency monitoring and migrations
//!
//! Watches pairs of tables for divergence and runs dialect-aware SQL
//! migrations that are checked with a keyed diff when they finish.
//!
//! # Features
//!
//! - **Monitor rules**: data diff, row count and schema change checks
//! - **Thresholds**: diff count, diff percent or row count difference with `> >= < <= == !=`
//! - **Cron scheduling**: one independent loop per rule, cooperative stop
//! - **Alerting**: log, webhook, Slack, DingTalk and SMTP email channels
//! - **Migrations**: pending/running/validating state machine with progress,
//!   cancel and reset
//! - **Dialect translation**: regex rewrite tables between SQL dialects
//! - **HTTP API**: rule, scheduler, alert and migration management
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use driftwatch::alerts::AlertDispatcher;
//! use driftwatch::gateway::{MemoryGateway, TableRef};
//! use driftwatch::monitor::{Monitor, MonitorKind, MonitorRule, Operator, RuleStore, ThresholdKind};
//!
//! # async fn example() {
//! let gateway = Arc::new(MemoryGateway::new());
//! let monitor = Monitor::new(
//!     Arc::new(RuleStore::new()),
//!     gateway,
//!     Arc::new(AlertDispatcher::new()),
//! );
//!
//! let rule = MonitorRule::new("orders", MonitorKind::DataDiff, TableRef::new("mysql://a/shop", "orders"))
//!     .with_target(TableRef::new("postgresql://b/shop", "orders"))
//!     .with_threshold(ThresholdKind::DiffPercent, Operator::Gt, 1.0)
//!     .with_schedule("*/5 * * * *");
//! monitor.store().add(rule).unwrap();
//!
//! let result = monitor.run("orders").await.unwrap();
//! println!("triggered: {}", result.triggered);
//! # }
//! ```

pub mod alerts;
pub mod api;
pub mod gateway;
pub mod migration;
pub mod monitor;
