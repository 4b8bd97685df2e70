//! Post-migration consistency validation

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gateway::{DiffGateway, DiffOptions, GatewayError, TableRef};

/// Numbers behind a validation verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub source: TableRef,
    pub target: TableRef,
    pub diff_count: u64,
    pub diff_percent: f64,
    pub row_count_source: u64,
    pub row_count_target: u64,
    pub threshold: f64,
    pub checked_at: DateTime<Utc>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.diff_percent <= self.threshold
    }

    /// Human readable reason for a failed validation
    pub fn discrepancy(&self) -> String {
        format!(
            "Diff percentage {:.2}% exceeds threshold {}% ({} differing rows)",
            self.diff_percent, self.threshold, self.diff_count
        )
    }
}

#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    Passed(ValidationReport),
    Discrepancy(ValidationReport),
    Unreachable(GatewayError),
}

impl ValidationOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, ValidationOutcome::Passed(_))
    }

    pub fn report(&self) -> Option<&ValidationReport> {
        match self {
            ValidationOutcome::Passed(report) | ValidationOutcome::Discrepancy(report) => {
                Some(report)
            }
            ValidationOutcome::Unreachable(_) => None,
        }
    }
}

/// One entry of a batch validation
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    pub source: TableRef,
    pub target: TableRef,
    pub options: DiffOptions,
    pub threshold: f64,
}

#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub unreachable: usize,
    pub outcomes: Vec<ValidationOutcome>,
}

/// Compares migrated data with its source through the diff gateway
pub struct MigrationValidator {
    gateway: Arc<dyn DiffGateway>,
}

impl MigrationValidator {
    pub fn new(gateway: Arc<dyn DiffGateway>) -> Self {
        Self { gateway }
    }

    /// Passes when the diff percentage is at most `threshold`
    pub async fn validate(
        &self,
        source: &TableRef,
        target: &TableRef,
        options: &DiffOptions,
        threshold: f64,
    ) -> ValidationOutcome {
        tracing::info!(source = %source, target = %target, "Validating migration");

        let stats = match self.gateway.diff_keyed(source, target, options).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(
                    source = %source,
                    target = %target,
                    error = %e,
                    "Validation could not reach data source"
                );
                return ValidationOutcome::Unreachable(e);
            }
        };

        let report = ValidationReport {
            source: source.clone(),
            target: target.clone(),
            diff_count: stats.diff_count,
            diff_percent: stats.diff_percent(),
            row_count_source: stats.rows_a,
            row_count_target: stats.rows_b,
            threshold,
            checked_at: Utc::now(),
        };

        tracing::info!(
            source = %source,
            target = %target,
            diff_count = report.diff_count,
            diff_percent = report.diff_percent,
            passed = report.passed(),
            "Validation finished"
        );

        if report.passed() {
            ValidationOutcome::Passed(report)
        } else {
            ValidationOutcome::Discrepancy(report)
        }
    }

    /// Validate several pairs one after another
    pub async fn validate_batch(&self, requests: &[ValidationRequest]) -> BatchSummary {
        let mut outcomes = Vec::with_capacity(requests.len());
        for (i, request) in requests.iter().enumerate() {
            tracing::debug!(current = i + 1, total = requests.len(), "Batch validation");
            outcomes.push(
                self.validate(
                    &request.source,
                    &request.target,
                    &request.options,
                    request.threshold,
                )
                .await,
            );
        }

        let passed = outcomes.iter().filter(|o| o.is_passed()).count();
        let unreachable = outcomes
            .iter()
            .filter(|o| matches!(o, ValidationOutcome::Unreachable(_)))
            .count();
        BatchSummary {
            total: outcomes.len(),
            passed,
            failed: outcomes.len() - passed,
            unreachable,
            outcomes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::row;
    use crate::gateway::MemoryGateway;
    use serde_json::json;

    fn users(n: i64) -> Vec<crate::gateway::memory::Row> {
        (1..=n)
            .map(|i| row([("id", json!(i)), ("name", json!(format!("user{}", i)))]))
            .collect()
    }

    fn setup() -> (Arc<MemoryGateway>, MigrationValidator, TableRef, TableRef) {
        let gateway = Arc::new(MemoryGateway::new());
        let source = TableRef::new("mysql://src", "users");
        let target = TableRef::new("postgresql://dst", "users");
        gateway.put_table(source.clone(), users(100));
        gateway.put_table(target.clone(), users(100));
        let validator = MigrationValidator::new(gateway.clone());
        (gateway, validator, source, target)
    }

    fn options() -> DiffOptions {
        let mut options = DiffOptions::new(vec!["id".to_string()]);
        options.extra_columns = vec!["name".to_string()];
        options
    }

    #[tokio::test]
    async fn test_identical_tables_pass() {
        let (_gateway, validator, source, target) = setup();
        let outcome = validator.validate(&source, &target, &options(), 0.0).await;
        let ValidationOutcome::Passed(report) = &outcome else {
            panic!("expected pass, got {:?}", outcome);
        };
        assert_eq!(report.diff_count, 0);
        assert_eq!(report.diff_percent, 0.0);
        assert_eq!(report.row_count_source, 100);
    }

    #[tokio::test]
    async fn test_extra_row_is_discrepancy() {
        let (gateway, validator, source, target) = setup();
        gateway.insert_row(&target, row([("id", json!(101)), ("name", json!("extra"))]));

        let outcome = validator.validate(&source, &target, &options(), 0.0).await;
        let ValidationOutcome::Discrepancy(report) = &outcome else {
            panic!("expected discrepancy, got {:?}", outcome);
        };
        assert_eq!(report.diff_count, 1);
        assert_eq!(report.row_count_target, 101);
        assert!((report.diff_percent - 100.0 / 101.0).abs() < 1e-9);
        assert!(report.discrepancy().contains("0.99%"));

        // Tolerated under a looser threshold
        let outcome = validator.validate(&source, &target, &options(), 1.0).await;
        assert!(outcome.is_passed());
    }

    #[tokio::test]
    async fn test_unreachable_target() {
        let (gateway, validator, source, target) = setup();
        gateway.set_unreachable("postgresql://dst", "connection refused");
        let outcome = validator.validate(&source, &target, &options(), 0.0).await;
        assert!(matches!(outcome, ValidationOutcome::Unreachable(_)));
        assert!(outcome.report().is_none());
    }

    #[tokio::test]
    async fn test_validate_batch() {
        let (gateway, validator, source, target) = setup();
        let other = TableRef::new("mysql://down", "users");
        gateway.set_unreachable("mysql://down", "timeout");

        let ok = ValidationRequest {
            source: source.clone(),
            target: target.clone(),
            options: options(),
            threshold: 0.0,
        };
        let broken = ValidationRequest {
            source: other,
            ..ok.clone()
        };
        let summary = validator.validate_batch(&[ok.clone(), broken, ok]).await;
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.unreachable, 1);
    }
}
