//! Adapter for turning raw rows into validated student-term records
//!
//! Rows that fail identity validation are dropped and reported; the rest of
//! the batch continues.

use crate::error::{RiskError, SchemaError};
use crate::schema::raw_record::RawStudentRecord;
use crate::types::{RowWarning, StudentTermRecord, Term};
use serde::Serialize;
use std::collections::HashSet;

/// Adapter for parsing and validating raw rows
pub struct RecordAdapter;

impl RecordAdapter {
    /// Parse a JSON string containing an array of rows
    pub fn parse_array(json: &str) -> Result<Vec<RawStudentRecord>, RiskError> {
        let rows: Vec<RawStudentRecord> = serde_json::from_str(json)?;
        Ok(rows)
    }

    /// Parse NDJSON (newline-delimited JSON) rows
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawStudentRecord>, RiskError> {
        let mut rows = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawStudentRecord>(trimmed) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    return Err(RiskError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(rows)
    }

    /// Validate a batch of rows.
    ///
    /// Enforces `(student_id, term)` uniqueness: the first occurrence wins and
    /// later duplicates are dropped as [`SchemaError::DuplicateRecord`].
    pub fn validate_batch(rows: &[RawStudentRecord]) -> ValidatedBatch {
        let mut seen: HashSet<(String, Term)> = HashSet::new();
        let mut batch = ValidatedBatch {
            rows_read: rows.len(),
            ..Default::default()
        };

        for (row, raw) in rows.iter().enumerate() {
            match raw.validate(row, &mut batch.warnings) {
                Ok(record) => {
                    let key = (record.student_id.clone(), record.term);
                    if seen.insert(key) {
                        batch.records.push(record);
                    } else {
                        batch.dropped.push(SchemaError::DuplicateRecord {
                            row,
                            student_id: record.student_id,
                            term: record.term.to_string(),
                        });
                    }
                }
                Err(e) => batch.dropped.push(e),
            }
        }

        if !batch.dropped.is_empty() {
            tracing::warn!(
                dropped = batch.dropped.len(),
                rows = batch.rows_read,
                "dropped rows failing schema validation"
            );
        }

        batch
    }
}

/// Outcome of validating a batch of raw rows
#[derive(Debug, Clone, Default)]
pub struct ValidatedBatch {
    pub rows_read: usize,
    pub records: Vec<StudentTermRecord>,
    pub dropped: Vec<SchemaError>,
    pub warnings: Vec<RowWarning>,
}

impl ValidatedBatch {
    /// Serializable summary of the batch's problems
    pub fn report(&self) -> ValidationReport {
        ValidationReport {
            rows_read: self.rows_read,
            valid_rows: self.records.len(),
            dropped_rows: self.dropped.len(),
            errors: self
                .dropped
                .iter()
                .map(|e| ValidationErrorDetail {
                    row: e.row(),
                    error: e.to_string(),
                })
                .collect(),
            warnings: self.warnings.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub rows_read: usize,
    pub valid_rows: usize,
    pub dropped_rows: usize,
    pub errors: Vec<ValidationErrorDetail>,
    pub warnings: Vec<RowWarning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationErrorDetail {
    pub row: usize,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ndjson_skips_blank_lines() {
        let input = r#"{"student_id": "STU-1", "term": "Fall2024", "final_score": 81}

{"student_id": "STU-2", "term": "Fall2024"}
"#;
        let rows = RecordAdapter::parse_ndjson(input).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].final_score, Some(81.0));
    }

    #[test]
    fn test_parse_ndjson_reports_line() {
        let input = "{\"student_id\": \"STU-1\", \"term\": \"Fall2024\"}\nnot json\n";
        let err = RecordAdapter::parse_ndjson(input).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_array() {
        let input = r#"[{"student_id": "STU-1", "term": "Fall2024"}, {"term": "Fall2024"}]"#;
        let rows = RecordAdapter::parse_array(input).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].student_id, None);
    }

    #[test]
    fn test_validate_batch_drops_bad_and_duplicate_rows() {
        let rows = RecordAdapter::parse_array(
            r#"[
                {"student_id": "STU-1", "term": "Fall2024", "final_score": 80},
                {"term": "Fall2024"},
                {"student_id": "STU-1", "term": "Fall 2024", "final_score": 40},
                {"student_id": "STU-1", "term": "Spring2025"}
            ]"#,
        )
        .unwrap();

        let batch = RecordAdapter::validate_batch(&rows);
        assert_eq!(batch.rows_read, 4);
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.dropped.len(), 2);
        assert_eq!(batch.records[0].final_score, Some(80.0));
        assert!(matches!(
            batch.dropped[1],
            SchemaError::DuplicateRecord { row: 2, .. }
        ));

        let report = batch.report();
        assert_eq!(report.valid_rows, 2);
        assert_eq!(report.errors[0].row, 1);
    }
}
