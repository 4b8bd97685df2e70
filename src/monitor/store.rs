//! Rule registry with per-rule result history

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use super::rule::{MonitorResult, MonitorRule, RuleError};
use crate::gateway::SchemaSnapshot;

/// Default number of results kept per rule
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

struct RuleEntry {
    rule: MonitorRule,
    history: VecDeque<MonitorResult>,
    schema_baseline: Option<SchemaSnapshot>,
}

/// Thread-safe registry of monitor rules.
///
/// Every accessor hands out clones; the lock is never held while a rule runs.
pub struct RuleStore {
    rules: Mutex<HashMap<String, RuleEntry>>,
    history_limit: usize,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            rules: Mutex::new(HashMap::new()),
            history_limit: history_limit.max(1),
        }
    }

    /// Register a new rule
    pub fn add(&self, rule: MonitorRule) -> Result<(), RuleError> {
        rule.validate()?;

        let mut rules = self.rules.lock();
        if rules.contains_key(&rule.name) {
            return Err(RuleError::DuplicateName(rule.name));
        }

        tracing::info!(rule = %rule.name, kind = ?rule.kind, "Monitor rule added");
        rules.insert(
            rule.name.clone(),
            RuleEntry {
                rule,
                history: VecDeque::new(),
                schema_baseline: None,
            },
        );
        Ok(())
    }

    /// Remove a rule along with its history
    pub fn remove(&self, name: &str) -> Result<MonitorRule, RuleError> {
        let removed = self.rules.lock().remove(name);
        match removed {
            Some(entry) => {
                tracing::info!(rule = %name, "Monitor rule removed");
                Ok(entry.rule)
            }
            None => Err(RuleError::NotFound(name.to_string())),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.lock().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<MonitorRule> {
        self.rules.lock().get(name).map(|e| e.rule.clone())
    }

    /// All rules, sorted by name
    pub fn list(&self) -> Vec<MonitorRule> {
        let mut rules: Vec<MonitorRule> =
            self.rules.lock().values().map(|e| e.rule.clone()).collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        rules
    }

    /// Enabled rules that carry a schedule
    pub fn scheduled(&self) -> Vec<MonitorRule> {
        self.list()
            .into_iter()
            .filter(|r| r.enabled && r.schedule.is_some())
            .collect()
    }

    pub fn enable(&self, name: &str) -> Result<(), RuleError> {
        self.set_enabled(name, true)
    }

    pub fn disable(&self, name: &str) -> Result<(), RuleError> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), RuleError> {
        let mut rules = self.rules.lock();
        let entry = rules
            .get_mut(name)
            .ok_or_else(|| RuleError::NotFound(name.to_string()))?;
        entry.rule.enabled = enabled;
        tracing::info!(rule = %name, enabled, "Monitor rule toggled");
        Ok(())
    }

    /// Append a result to its rule's history.
    ///
    /// Returns false when the rule was removed in the meantime.
    pub fn record(&self, result: MonitorResult) -> bool {
        let mut rules = self.rules.lock();
        match rules.get_mut(&result.rule_name) {
            Some(entry) => {
                entry.history.push_back(result);
                while entry.history.len() > self.history_limit {
                    entry.history.pop_front();
                }
                true
            }
            None => false,
        }
    }

    /// Most recent `limit` results, oldest first
    pub fn history(&self, name: &str, limit: usize) -> Result<Vec<MonitorResult>, RuleError> {
        let rules = self.rules.lock();
        let entry = rules
            .get(name)
            .ok_or_else(|| RuleError::NotFound(name.to_string()))?;
        let skip = entry.history.len().saturating_sub(limit);
        Ok(entry.history.iter().skip(skip).cloned().collect())
    }

    pub fn last_result(&self, name: &str) -> Option<MonitorResult> {
        self.rules
            .lock()
            .get(name)
            .and_then(|e| e.history.back().cloned())
    }

    pub fn schema_baseline(&self, name: &str) -> Option<SchemaSnapshot> {
        self.rules
            .lock()
            .get(name)
            .and_then(|e| e.schema_baseline.clone())
    }

    /// Store a new baseline, returning the previous one
    pub fn replace_schema_baseline(
        &self,
        name: &str,
        snapshot: SchemaSnapshot,
    ) -> Option<SchemaSnapshot> {
        let mut rules = self.rules.lock();
        rules
            .get_mut(name)
            .and_then(|e| e.schema_baseline.replace(snapshot))
    }

    pub fn len(&self) -> usize {
        self.rules.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::TableRef;
    use crate::monitor::rule::{MonitorKind, Operator, ThresholdKind};

    fn rule(name: &str) -> MonitorRule {
        MonitorRule::new(name, MonitorKind::RowCount, TableRef::new("mysql://a", "t"))
            .with_target(TableRef::new("mysql://b", "t"))
    }

    #[test]
    fn test_duplicate_name_keeps_existing() {
        let store = RuleStore::new();
        store
            .add(rule("r1").with_threshold(ThresholdKind::DiffCount, Operator::Gt, 5.0))
            .unwrap();

        let err = store
            .add(rule("r1").with_threshold(ThresholdKind::DiffPercent, Operator::Lt, 1.0))
            .unwrap_err();
        assert_eq!(err, RuleError::DuplicateName("r1".to_string()));

        let kept = store.get("r1").unwrap();
        let threshold = kept.threshold.unwrap();
        assert_eq!(threshold.kind, ThresholdKind::DiffCount);
        assert_eq!(threshold.value, 5.0);
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let store = RuleStore::new();
        assert_eq!(
            store.remove("ghost").unwrap_err(),
            RuleError::NotFound("ghost".to_string())
        );
        store.add(rule("r1")).unwrap();
        assert!(store.remove("r1").is_ok());
        assert!(store.get("r1").is_none());
    }

    #[test]
    fn test_invalid_rule_rejected_at_registration() {
        let store = RuleStore::new();
        let err = store
            .add(rule("bad").with_key_columns(Vec::<String>::new()))
            .unwrap_err();
        assert!(matches!(err, RuleError::InvalidRule(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_overflowing_interval_rejected_at_registration() {
        let store = RuleStore::new();
        let err = store
            .add(rule("huge").with_schedule("@every 9000000000000000s9000000000000000s"))
            .unwrap_err();
        assert!(matches!(err, RuleError::InvalidRule(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshots_are_copies() {
        let store = RuleStore::new();
        store.add(rule("r1")).unwrap();

        let mut snapshot = store.get("r1").unwrap();
        snapshot.enabled = false;
        snapshot.key_columns.clear();

        let stored = store.get("r1").unwrap();
        assert!(stored.enabled);
        assert_eq!(stored.key_columns, vec!["id".to_string()]);
    }

    #[test]
    fn test_enable_disable() {
        let store = RuleStore::new();
        store.add(rule("r1").with_schedule("* * * * *")).unwrap();
        assert_eq!(store.scheduled().len(), 1);

        store.disable("r1").unwrap();
        assert!(!store.get("r1").unwrap().enabled);
        assert!(store.scheduled().is_empty());

        store.enable("r1").unwrap();
        assert!(store.get("r1").unwrap().enabled);
        assert!(store.enable("ghost").is_err());
    }

    #[test]
    fn test_history_bounded_and_ordered() {
        let store = RuleStore::with_history_limit(3);
        store.add(rule("r1")).unwrap();

        for i in 0..5u64 {
            let mut result = MonitorResult::empty("r1");
            result.diff_count = i;
            assert!(store.record(result));
        }

        let history = store.history("r1", 10).unwrap();
        let counts: Vec<u64> = history.iter().map(|r| r.diff_count).collect();
        assert_eq!(counts, vec![2, 3, 4]);

        let latest = store.history("r1", 1).unwrap();
        assert_eq!(latest[0].diff_count, 4);
        assert_eq!(store.last_result("r1").unwrap().diff_count, 4);

        assert!(!store.record(MonitorResult::empty("ghost")));
    }

    #[test]
    fn test_list_sorted() {
        let store = RuleStore::new();
        store.add(rule("b")).unwrap();
        store.add(rule("a")).unwrap();
        let names: Vec<String> = store.list().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
