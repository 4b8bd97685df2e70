//! Rule execution

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::rule::{MonitorKind, MonitorResult, MonitorRule, RuleError};
use super::store::RuleStore;
use super::threshold::is_triggered;
use crate::alerts::{AlertDispatcher, AlertEvent};
use crate::gateway::{percent_of_larger, DiffGateway, GatewayError};

/// Runs rules against the gateway, records results and raises alerts.
///
/// Manual triggers and the scheduler share this path. Runs of the same rule
/// are serialized; different rules run independently.
pub struct Monitor {
    store: Arc<RuleStore>,
    gateway: Arc<dyn DiffGateway>,
    dispatcher: Arc<AlertDispatcher>,
    run_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Monitor {
    pub fn new(
        store: Arc<RuleStore>,
        gateway: Arc<dyn DiffGateway>,
        dispatcher: Arc<AlertDispatcher>,
    ) -> Self {
        Self {
            store,
            gateway,
            dispatcher,
            run_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<AlertDispatcher> {
        &self.dispatcher
    }

    /// Remove a rule from the store and forget its execution lock
    pub fn remove(&self, name: &str) -> Result<MonitorRule, RuleError> {
        let rule = self.store.remove(name)?;
        self.prune_run_lock(name);
        Ok(rule)
    }

    /// Run a named rule now.
    ///
    /// A disabled rule is skipped: the returned result is successful and
    /// untriggered, and nothing is recorded.
    pub async fn run(&self, name: &str) -> Result<MonitorResult, RuleError> {
        let rule = self
            .store
            .get(name)
            .ok_or_else(|| RuleError::NotFound(name.to_string()))?;

        if !rule.enabled {
            tracing::info!(rule = %name, "Rule is disabled, skipping run");
            return Ok(MonitorResult::empty(name));
        }

        Ok(self.run_rule(&rule).await)
    }

    /// Execute a rule snapshot. Never fails: gateway errors become a failed result.
    pub async fn run_rule(&self, rule: &MonitorRule) -> MonitorResult {
        let lock = self.run_lock(&rule.name);
        let result = {
            let _guard = lock.lock().await;
            self.execute(rule).await
        };
        drop(lock);
        self.prune_run_lock(&rule.name);
        result
    }

    async fn execute(&self, rule: &MonitorRule) -> MonitorResult {

        let started = Instant::now();
        tracing::debug!(rule = %rule.name, kind = ?rule.kind, "Running monitor rule");

        let mut result = match self.measure(rule).await {
            Ok(mut result) => {
                result.triggered = is_triggered(rule.threshold.as_ref(), &result);
                result
            }
            Err(e) => {
                tracing::error!(rule = %rule.name, error = %e, "Monitor check failed");
                MonitorResult::failed(&rule.name, e.to_string())
            }
        };
        result.duration_ms = started.elapsed().as_millis() as u64;

        self.store.record(result.clone());

        if result.triggered {
            tracing::info!(
                rule = %rule.name,
                diff_count = result.diff_count,
                diff_percent = result.diff_percent,
                "Threshold breached"
            );
            let event = AlertEvent::from_result(rule, &result);
            self.dispatcher.dispatch(&event).await;
        }

        result
    }

    fn run_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.run_locks.lock();
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    /// Drop the lock of a rule that is gone from the store and not running
    fn prune_run_lock(&self, name: &str) {
        let mut locks = self.run_locks.lock();
        let idle = locks
            .get(name)
            .map_or(false, |lock| Arc::strong_count(lock) == 1);
        if idle && !self.store.contains(name) {
            locks.remove(name);
        }
    }

    async fn measure(&self, rule: &MonitorRule) -> Result<MonitorResult, GatewayError> {
        let mut result = MonitorResult::empty(&rule.name);

        match rule.kind {
            MonitorKind::DataDiff => {
                let target = rule.target.as_ref().ok_or_else(|| {
                    GatewayError::TableNotFound(format!("rule '{}' has no target table", rule.name))
                })?;
                let stats = self
                    .gateway
                    .diff_keyed(&rule.source, target, &rule.diff_options())
                    .await?;

                result.diff_count = stats.diff_count;
                result.diff_percent = stats.diff_percent();
                result.row_count_table1 = stats.rows_a;
                result.row_count_table2 = stats.rows_b;
            }
            MonitorKind::RowCount => {
                let (count1, count2) = match &rule.target {
                    Some(target) => tokio::try_join!(
                        self.gateway.row_count(&rule.source),
                        self.gateway.row_count(target)
                    )?,
                    None => (self.gateway.row_count(&rule.source).await?, 0),
                };

                result.diff_count = count1.abs_diff(count2);
                result.diff_percent = percent_of_larger(result.diff_count, count1, count2);
                result.row_count_table1 = count1;
                result.row_count_table2 = count2;
            }
            MonitorKind::SchemaChange => {
                let snapshot = self.gateway.schema_snapshot(&rule.source).await?;
                // First run only stores the baseline
                let changes = self
                    .store
                    .replace_schema_baseline(&rule.name, snapshot.clone())
                    .map(|previous| previous.changes_to(&snapshot))
                    .unwrap_or_default();

                result.diff_count = changes.count();
                result.schema_changes = Some(changes);
            }
        }

        result.timestamp = chrono::Utc::now();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertChannel, NotifierError};
    use crate::gateway::memory::{row, Row};
    use crate::gateway::{MemoryGateway, SchemaSnapshot, TableRef};
    use crate::monitor::rule::{Operator, ThresholdKind};
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingChannel;

    #[async_trait]
    impl AlertChannel for FailingChannel {
        fn name(&self) -> &str {
            "failing"
        }

        async fn send(&self, _event: &AlertEvent) -> Result<(), NotifierError> {
            Err(NotifierError::Webhook("connection refused".to_string()))
        }
    }

    fn rows(ids: &[i64]) -> Vec<Row> {
        ids.iter()
            .map(|i| row([("id", json!(i)), ("amount", json!(i * 10))]))
            .collect()
    }

    fn setup() -> (Arc<MemoryGateway>, Monitor) {
        let gateway = Arc::new(MemoryGateway::new());
        let monitor = Monitor::new(
            Arc::new(RuleStore::new()),
            gateway.clone(),
            Arc::new(AlertDispatcher::new()),
        );
        (gateway, monitor)
    }

    fn source() -> TableRef {
        TableRef::new("mysql://primary", "orders")
    }

    fn target() -> TableRef {
        TableRef::new("postgresql://replica", "orders")
    }

    fn diff_rule() -> MonitorRule {
        MonitorRule::new("orders-diff", MonitorKind::DataDiff, source())
            .with_target(target())
            .with_extra_columns(["amount"])
            .with_threshold(ThresholdKind::DiffCount, Operator::Gt, 0.0)
    }

    #[tokio::test]
    async fn test_identical_tables_do_not_trigger() {
        let (gateway, monitor) = setup();
        gateway.put_table(source(), rows(&[1, 2, 3]));
        gateway.put_table(target(), rows(&[1, 2, 3]));
        monitor.store().add(diff_rule()).unwrap();

        let result = monitor.run("orders-diff").await.unwrap();
        assert!(result.success);
        assert_eq!(result.diff_count, 0);
        assert_eq!(result.diff_percent, 0.0);
        assert!(!result.triggered);
        assert_eq!(result.row_count_table1, 3);
        assert!(monitor.dispatcher().history(10).is_empty());
    }

    #[tokio::test]
    async fn test_breach_triggers_alert() {
        let (gateway, monitor) = setup();
        gateway.put_table(source(), rows(&[1, 2, 3, 4]));
        gateway.put_table(target(), rows(&[1, 2, 3]));
        monitor.store().add(diff_rule()).unwrap();

        let result = monitor.run("orders-diff").await.unwrap();
        assert!(result.success);
        assert!(result.triggered);
        assert_eq!(result.diff_count, 1);
        assert_eq!(result.diff_percent, 25.0);

        let alerts = monitor.dispatcher().history(10);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule_name, "orders-diff");
    }

    #[tokio::test]
    async fn test_unreachable_source_records_failure() {
        let (gateway, monitor) = setup();
        gateway.put_table(source(), rows(&[1]));
        gateway.put_table(target(), rows(&[1]));
        gateway.set_unreachable("mysql://primary", "connection refused");
        monitor
            .store()
            .add(diff_rule().with_threshold(ThresholdKind::DiffCount, Operator::Gte, 0.0))
            .unwrap();

        let result = monitor.run("orders-diff").await.unwrap();
        assert!(!result.success);
        assert!(!result.triggered);
        assert!(!result.error.as_deref().unwrap_or_default().is_empty());

        // Failures are recorded but never alerted
        assert_eq!(monitor.store().history("orders-diff", 10).unwrap().len(), 1);
        assert!(monitor.dispatcher().history(10).is_empty());
    }

    #[tokio::test]
    async fn test_channel_failure_does_not_fail_run() {
        let (gateway, monitor) = setup();
        gateway.put_table(source(), rows(&[1, 2]));
        gateway.put_table(target(), rows(&[1]));
        monitor
            .dispatcher()
            .add_channel(Arc::new(FailingChannel))
            .unwrap();
        monitor.store().add(diff_rule()).unwrap();

        let result = monitor.run("orders-diff").await.unwrap();
        assert!(result.success);
        assert!(result.triggered);
    }

    #[tokio::test]
    async fn test_row_count_rule() {
        let (gateway, monitor) = setup();
        gateway.put_table(source(), rows(&[1, 2, 3, 4]));
        gateway.put_table(target(), rows(&[1]));
        monitor
            .store()
            .add(
                MonitorRule::new("counts", MonitorKind::RowCount, source())
                    .with_target(target())
                    .with_threshold(ThresholdKind::RowCountDiff, Operator::Gte, 3.0),
            )
            .unwrap();

        let result = monitor.run("counts").await.unwrap();
        assert_eq!(result.diff_count, 3);
        assert_eq!(result.diff_percent, 75.0);
        assert!(result.triggered);
    }

    #[tokio::test]
    async fn test_row_count_both_empty_is_zero_percent() {
        let (gateway, monitor) = setup();
        gateway.put_table(source(), Vec::new());
        gateway.put_table(target(), Vec::new());
        monitor
            .store()
            .add(
                MonitorRule::new("empty", MonitorKind::RowCount, source())
                    .with_target(target())
                    .with_threshold(ThresholdKind::DiffPercent, Operator::Gt, 0.0),
            )
            .unwrap();

        let result = monitor.run("empty").await.unwrap();
        assert!(result.success);
        assert_eq!(result.diff_percent, 0.0);
        assert!(!result.triggered);
    }

    #[tokio::test]
    async fn test_schema_change_baseline_then_diff() {
        let (gateway, monitor) = setup();
        let table = TableRef::new("postgresql://replica", "users");
        gateway.set_schema(&table, SchemaSnapshot::new([("id", "int"), ("name", "text")]));
        monitor
            .store()
            .add(
                MonitorRule::new("users-schema", MonitorKind::SchemaChange, table.clone())
                    .with_threshold(ThresholdKind::DiffCount, Operator::Gt, 0.0),
            )
            .unwrap();

        let first = monitor.run("users-schema").await.unwrap();
        assert!(first.success);
        assert_eq!(first.diff_count, 0);
        assert!(!first.triggered);

        gateway.set_schema(
            &table,
            SchemaSnapshot::new([("id", "bigint"), ("name", "text"), ("email", "text")]),
        );
        let second = monitor.run("users-schema").await.unwrap();
        assert_eq!(second.diff_count, 2);
        assert!(second.triggered);
        let changes = second.schema_changes.unwrap();
        assert_eq!(changes.added, vec!["email".to_string()]);
        assert_eq!(changes.type_changed, vec!["id".to_string()]);

        // Baseline moved forward
        let third = monitor.run("users-schema").await.unwrap();
        assert_eq!(third.diff_count, 0);
    }

    #[tokio::test]
    async fn test_disabled_and_missing_rules() {
        let (_gateway, monitor) = setup();
        assert!(matches!(
            monitor.run("ghost").await,
            Err(RuleError::NotFound(_))
        ));

        monitor
            .store()
            .add(diff_rule().with_enabled(false))
            .unwrap();
        let result = monitor.run("orders-diff").await.unwrap();
        assert!(result.success);
        assert!(!result.triggered);
        assert!(monitor.store().history("orders-diff", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_runs_of_one_rule_do_not_overlap() {
        let (gateway, monitor) = setup();
        gateway.put_table(source(), rows(&[1]));
        gateway.put_table(target(), rows(&[1]));
        gateway.set_latency("mysql://primary", std::time::Duration::from_millis(100));
        monitor.store().add(diff_rule()).unwrap();
        let monitor = Arc::new(monitor);

        let a = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            async move { monitor.run("orders-diff").await.unwrap() }
        });
        let b = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            async move { monitor.run("orders-diff").await.unwrap() }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        // Serialized runs: one finished before the other started measuring
        let (first, second) = if a.timestamp <= b.timestamp { (a, b) } else { (b, a) };
        let gap = second.timestamp - first.timestamp;
        assert!(gap >= chrono::Duration::milliseconds(90));

        let history = monitor.store().history("orders-diff", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].timestamp <= history[1].timestamp);
    }

    #[tokio::test]
    async fn test_removed_rules_release_their_run_lock() {
        let (gateway, monitor) = setup();
        gateway.put_table(source(), rows(&[1]));
        gateway.put_table(target(), rows(&[1]));
        monitor.store().add(diff_rule()).unwrap();

        monitor.run("orders-diff").await.unwrap();
        assert!(monitor.run_locks.lock().contains_key("orders-diff"));
        monitor.remove("orders-diff").unwrap();
        assert!(monitor.run_locks.lock().is_empty());
        assert!(matches!(
            monitor.remove("orders-diff"),
            Err(RuleError::NotFound(_))
        ));

        // Removed from the store while a run was in flight
        gateway.set_latency("mysql://primary", std::time::Duration::from_millis(50));
        monitor.store().add(diff_rule()).unwrap();
        let rule = monitor.store().get("orders-diff").unwrap();
        let monitor = Arc::new(monitor);
        let running = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            async move { monitor.run_rule(&rule).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        monitor.store().remove("orders-diff").unwrap();
        assert!(running.await.unwrap().success);
        assert!(monitor.run_locks.lock().is_empty());
    }
}
