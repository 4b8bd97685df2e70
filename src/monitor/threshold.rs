//! Threshold evaluation

use super::rule::{MonitorResult, Operator, Threshold, ThresholdKind};

/// Absolute tolerance for `==` and `!=`
pub const EQUALITY_TOLERANCE: f64 = 1e-4;

/// `measured <op> threshold`
pub fn evaluate(op: Operator, measured: f64, threshold: f64) -> bool {
    match op {
        Operator::Gt => measured > threshold,
        Operator::Gte => measured >= threshold,
        Operator::Lt => measured < threshold,
        Operator::Lte => measured <= threshold,
        Operator::Eq => (measured - threshold).abs() < EQUALITY_TOLERANCE,
        Operator::Ne => (measured - threshold).abs() >= EQUALITY_TOLERANCE,
    }
}

/// Pick the quantity a threshold kind refers to
pub fn measured_value(kind: ThresholdKind, result: &MonitorResult) -> f64 {
    match kind {
        ThresholdKind::DiffCount => result.diff_count as f64,
        ThresholdKind::DiffPercent => result.diff_percent,
        ThresholdKind::RowCountDiff => result.row_count_diff() as f64,
    }
}

/// Whether a successful result breaches the threshold
pub fn is_triggered(threshold: Option<&Threshold>, result: &MonitorResult) -> bool {
    if !result.success {
        return false;
    }
    match threshold {
        Some(t) => evaluate(t.operator, measured_value(t.kind, result), t.value),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operators() {
        assert!(evaluate(Operator::Gt, 2.0, 1.0));
        assert!(!evaluate(Operator::Gt, 1.0, 1.0));
        assert!(evaluate(Operator::Gte, 1.0, 1.0));
        assert!(evaluate(Operator::Lt, 0.5, 1.0));
        assert!(!evaluate(Operator::Lt, 1.0, 1.0));
        assert!(evaluate(Operator::Lte, 1.0, 1.0));
        assert!(evaluate(Operator::Eq, 1.0, 1.0));
        assert!(!evaluate(Operator::Eq, 1.0, 2.0));
        assert!(!evaluate(Operator::Ne, 1.0, 1.0));
        assert!(evaluate(Operator::Ne, 1.0, 1.5));
    }

    #[test]
    fn test_equality_tolerance() {
        assert!(evaluate(Operator::Eq, 0.1 + 0.2, 0.3));
        assert!(!evaluate(Operator::Ne, 0.1 + 0.2, 0.3));
    }

    #[test]
    fn test_measured_value_by_kind() {
        let mut result = MonitorResult::empty("r");
        result.diff_count = 7;
        result.diff_percent = 3.5;
        result.row_count_table1 = 10;
        result.row_count_table2 = 25;

        assert_eq!(measured_value(ThresholdKind::DiffCount, &result), 7.0);
        assert_eq!(measured_value(ThresholdKind::DiffPercent, &result), 3.5);
        assert_eq!(measured_value(ThresholdKind::RowCountDiff, &result), 15.0);
    }

    #[test]
    fn test_failed_results_never_trigger() {
        let threshold = Threshold {
            kind: ThresholdKind::DiffCount,
            operator: Operator::Gte,
            value: 0.0,
        };
        let ok = MonitorResult::empty("r");
        assert!(is_triggered(Some(&threshold), &ok));

        let failed = MonitorResult::failed("r", "down");
        assert!(!is_triggered(Some(&threshold), &failed));
        assert!(!is_triggered(None, &ok));
    }
}
