//! Non-blocking data-quality checks over a fetched batch.

use tidemark_warehouse::PriceRecord;

/// One finding. Findings are recorded; they never stop a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityIssue {
    pub issue_type: &'static str,
    pub detail: String,
}

/// A single side-effect-free predicate over a batch.
pub trait QualityRule: Send + Sync {
    fn check(&self, rows: &[PriceRecord]) -> Vec<QualityIssue>;
}

/// Flags every row whose close price is zero or negative.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonPositiveClose;

impl QualityRule for NonPositiveClose {
    fn check(&self, rows: &[PriceRecord]) -> Vec<QualityIssue> {
        rows.iter()
            .filter_map(|row| {
                let close = row.close?;
                (close <= 0.0).then(|| QualityIssue {
                    issue_type: "InvalidValue",
                    detail: format!(
                        "close price {close} <= 0 at {} hour {}",
                        row.date, row.hour
                    ),
                })
            })
            .collect()
    }
}

/// Runs every configured rule over a batch.
pub struct QualityValidator {
    rules: Vec<Box<dyn QualityRule>>,
}

impl Default for QualityValidator {
    fn default() -> Self {
        Self {
            rules: vec![Box::new(NonPositiveClose)],
        }
    }
}

impl QualityValidator {
    /// A validator with no rules.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: impl QualityRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn check(&self, rows: &[PriceRecord]) -> Vec<QualityIssue> {
        self.rules.iter().flat_map(|rule| rule.check(rows)).collect()
    }
}

impl std::fmt::Debug for QualityValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityValidator")
            .field("rules", &self.rules.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn row(hour: u8, close: Option<f64>) -> PriceRecord {
        PriceRecord {
            date: date!(2024 - 01 - 01),
            hour,
            source: String::from("BTC-USD"),
            open: close,
            high: close,
            low: close,
            close,
            volume: Some(1),
        }
    }

    #[test]
    fn non_positive_close_is_reported_per_row() {
        let rows = vec![row(0, Some(10.0)), row(1, Some(0.0)), row(2, Some(-3.5)), row(3, None)];

        let issues = QualityValidator::default().check(&rows);

        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|issue| issue.issue_type == "InvalidValue"));
        assert!(issues[0].detail.contains("hour 1"));
    }

    #[test]
    fn clean_batch_has_no_issues() {
        let rows = vec![row(0, Some(1.0)), row(1, Some(2.0))];
        assert!(QualityValidator::default().check(&rows).is_empty());
    }

    struct MissingVolume;

    impl QualityRule for MissingVolume {
        fn check(&self, rows: &[PriceRecord]) -> Vec<QualityIssue> {
            rows.iter()
                .filter(|row| row.volume.is_none())
                .map(|_| QualityIssue {
                    issue_type: "MissingValue",
                    detail: String::from("volume is null"),
                })
                .collect()
        }
    }

    #[test]
    fn extra_rules_run_alongside_defaults() {
        let mut missing = row(5, Some(-1.0));
        missing.volume = None;

        let issues = QualityValidator::default()
            .with_rule(MissingVolume)
            .check(&[missing]);

        let kinds = issues.iter().map(|issue| issue.issue_type).collect::<Vec<_>>();
        assert_eq!(kinds, vec!["InvalidValue", "MissingValue"]);
    }
}
