//! Source/target comparison of row counts and checksums
//!
//! A mismatch is a status, never an error.

use serde::{Deserialize, Serialize};

/// A measurement that may be missing on one side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    /// Value read from the database
    Known(u64),
    /// Could not be measured
    Unknown,
}

impl From<Option<u64>> for Measure {
    fn from(value: Option<u64>) -> Self {
        value.map_or(Self::Unknown, Self::Known)
    }
}

impl std::fmt::Display for Measure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Known(v) => write!(f, "{v}"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Outcome of one comparison or of a whole table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    /// Both sides known and equal
    Validated,
    /// Different, or at least one side unknown
    Mismatch,
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Validated => "VALIDATED",
            Self::Mismatch => "MISMATCH",
        })
    }
}

/// One measured quantity on both sides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comparison {
    /// Source value
    pub source: Measure,
    /// Target value
    pub target: Measure,
    /// Whether they agree
    pub status: ValidationStatus,
}

impl Comparison {
    /// Compare two optional measurements
    #[must_use]
    pub fn of(source: Option<u64>, target: Option<u64>) -> Self {
        let status = match (source, target) {
            (Some(s), Some(t)) if s == t => ValidationStatus::Validated,
            _ => ValidationStatus::Mismatch,
        };
        Self {
            source: source.into(),
            target: target.into(),
            status,
        }
    }

    /// Whether both sides agree
    #[inline]
    #[must_use]
    pub fn matched(&self) -> bool {
        self.status == ValidationStatus::Validated
    }
}

/// Validation result for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRecord {
    /// Table name
    pub table_name: String,
    /// Row counts
    pub row_count: Comparison,
    /// Checksums
    pub checksum: Comparison,
    /// `Validated` only when both comparisons are
    pub status: ValidationStatus,
}

/// Aggregate over a set of records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    /// Tables examined
    pub validated_count: usize,
    /// Tables whose counts and checksums agree
    pub matched_count: usize,
    /// Tables that disagree or could not be measured
    pub mismatched_count: usize,
    /// Names of the mismatched tables, in discovery order
    pub mismatched_tables: Vec<String>,
}

impl ValidationSummary {
    /// No mismatches
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.mismatched_count == 0
    }
}

/// Deterministic comparator
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    /// Compare one table
    #[must_use]
    pub fn compare(
        table: &str,
        source_rows: Option<u64>,
        target_rows: Option<u64>,
        source_checksum: Option<u64>,
        target_checksum: Option<u64>,
    ) -> ValidationRecord {
        let row_count = Comparison::of(source_rows, target_rows);
        let checksum = Comparison::of(source_checksum, target_checksum);
        let status = if row_count.matched() && checksum.matched() {
            ValidationStatus::Validated
        } else {
            ValidationStatus::Mismatch
        };
        tracing::debug!(table, %status, "table compared");
        ValidationRecord {
            table_name: table.to_string(),
            row_count,
            checksum,
            status,
        }
    }

    /// Aggregate records
    #[must_use]
    pub fn summarize(records: &[ValidationRecord]) -> ValidationSummary {
        let mismatched_tables: Vec<String> = records
            .iter()
            .filter(|r| r.status == ValidationStatus::Mismatch)
            .map(|r| r.table_name.clone())
            .collect();
        ValidationSummary {
            validated_count: records.len(),
            matched_count: records.len() - mismatched_tables.len(),
            mismatched_count: mismatched_tables.len(),
            mismatched_tables,
        }
    }
}

/// Records in discovery order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    records: Vec<ValidationRecord>,
}

impl ValidationReport {
    /// Empty report
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record
    pub fn push(&mut self, record: ValidationRecord) {
        self.records.push(record);
    }

    /// Records in discovery order
    #[inline]
    #[must_use]
    pub fn records(&self) -> &[ValidationRecord] {
        &self.records
    }

    /// Aggregate
    #[must_use]
    pub fn summary(&self) -> ValidationSummary {
        Validator::summarize(&self.records)
    }

    /// Plain-text table, one line per table
    #[must_use]
    pub fn render(&self) -> String {
        let width = self
            .records
            .iter()
            .map(|r| r.table_name.len())
            .max()
            .unwrap_or(0)
            .max("table".len());
        let mut out = format!(
            "{:<width$}  {:>21}  {:>25}  status\n",
            "table", "rows (source/target)", "checksum (source/target)"
        );
        for r in &self.records {
            out.push_str(&format!(
                "{:<width$}  {:>21}  {:>25}  {}\n",
                r.table_name,
                format!("{}/{}", r.row_count.source, r.row_count.target),
                format!("{}/{}", r.checksum.source, r.checksum.target),
                r.status,
            ));
        }
        out
    }
}

impl FromIterator<ValidationRecord> for ValidationReport {
    fn from_iter<T: IntoIterator<Item = ValidationRecord>>(iter: T) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn matrix() {
        let ok = Validator::compare("employees", Some(10), Some(10), Some(7), Some(7));
        assert_eq!(ok.status, ValidationStatus::Validated);

        let rows_differ = Validator::compare("salaries", Some(10), Some(9), Some(7), Some(7));
        assert_eq!(rows_differ.status, ValidationStatus::Mismatch);
        assert!(rows_differ.checksum.matched());

        let sum_differ = Validator::compare("titles", Some(10), Some(10), Some(7), Some(8));
        assert_eq!(sum_differ.status, ValidationStatus::Mismatch);

        let unknown = Validator::compare("dept_emp", Some(10), None, None, None);
        assert_eq!(unknown.status, ValidationStatus::Mismatch);
        assert_eq!(unknown.row_count.target, Measure::Unknown);
        assert_eq!(unknown.checksum.source.to_string(), "unknown");
    }

    #[test]
    fn summary_counts() {
        let report: ValidationReport = vec![
            Validator::compare("a", Some(1), Some(1), Some(1), Some(1)),
            Validator::compare("b", Some(1), Some(2), Some(1), Some(1)),
            Validator::compare("c", None, None, None, None),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            report.summary(),
            ValidationSummary {
                validated_count: 3,
                matched_count: 1,
                mismatched_count: 2,
                mismatched_tables: vec!["b".into(), "c".into()],
            }
        );
        assert!(!report.summary().is_clean());
    }

    #[test]
    fn render_marks_each_table() {
        let mut report = ValidationReport::new();
        report.push(Validator::compare("employees", Some(300_024), Some(300_024), Some(5), Some(5)));
        report.push(Validator::compare("salaries", Some(3), None, Some(1), Some(1)));
        let text = report.render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("employees"));
        assert!(lines[1].ends_with("VALIDATED"));
        assert!(lines[2].contains("3/unknown"));
        assert!(lines[2].ends_with("MISMATCH"));
    }

    #[test]
    fn empty_summary_is_clean() {
        let summary = Validator::summarize(&[]);
        assert_eq!(summary.validated_count, 0);
        assert!(summary.is_clean());
    }
}
