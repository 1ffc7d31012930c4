//! Raw student-term row as delivered by the data-assembly step

use crate::error::SchemaError;
use crate::types::{RowWarning, StudentTermRecord, Term};
use serde::{Deserialize, Serialize};

/// Field names of the input row, in column order
pub const INPUT_FIELDS: [&str; 7] = [
    "student_id",
    "term",
    "final_score",
    "attendance_percentage",
    "lms_logins_per_week",
    "disciplinary_incidents",
    "parental_education",
];

/// An unvalidated input row. Every field may be absent or null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStudentRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendance_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lms_logins_per_week: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disciplinary_incidents: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parental_education: Option<String>,
}

impl RawStudentRecord {
    /// Validate the identifying fields and range-check the optional ones.
    ///
    /// Out-of-range optional values are nulled and reported in `warnings`;
    /// only a missing or unparseable identity rejects the row.
    pub fn validate(
        &self,
        row: usize,
        warnings: &mut Vec<RowWarning>,
    ) -> Result<StudentTermRecord, SchemaError> {
        let student_id = self
            .student_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(SchemaError::MissingStudentId { row })?
            .to_string();

        let raw_term = self
            .term
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SchemaError::MissingTerm {
                row,
                student_id: student_id.clone(),
            })?;

        let term: Term = raw_term.parse().map_err(|_| SchemaError::InvalidTerm {
            row,
            student_id: student_id.clone(),
            term: raw_term.to_string(),
        })?;

        let mut check = RangeCheck {
            row,
            student_id: &student_id,
            warnings,
        };

        let final_score = check.percentage("final_score", self.final_score);
        let attendance_percentage =
            check.percentage("attendance_percentage", self.attendance_percentage);
        let lms_logins_per_week = check.count("lms_logins_per_week", self.lms_logins_per_week);
        let disciplinary_incidents =
            check.count("disciplinary_incidents", self.disciplinary_incidents);

        let parental_education = self
            .parental_education
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(StudentTermRecord {
            student_id,
            term,
            final_score,
            attendance_percentage,
            lms_logins_per_week,
            disciplinary_incidents,
            parental_education,
        })
    }
}

impl From<&StudentTermRecord> for RawStudentRecord {
    fn from(record: &StudentTermRecord) -> Self {
        Self {
            student_id: Some(record.student_id.clone()),
            term: Some(record.term.to_string()),
            final_score: record.final_score,
            attendance_percentage: record.attendance_percentage,
            lms_logins_per_week: record.lms_logins_per_week.map(f64::from),
            disciplinary_incidents: record.disciplinary_incidents.map(f64::from),
            parental_education: record.parental_education.clone(),
        }
    }
}

struct RangeCheck<'a> {
    row: usize,
    student_id: &'a str,
    warnings: &'a mut Vec<RowWarning>,
}

impl RangeCheck<'_> {
    fn percentage(&mut self, field: &str, value: Option<f64>) -> Option<f64> {
        let value = value?;
        if value.is_finite() && (0.0..=100.0).contains(&value) {
            Some(value)
        } else {
            self.reject(field, format!("{value} is outside 0-100"));
            None
        }
    }

    fn count(&mut self, field: &str, value: Option<f64>) -> Option<u32> {
        let value = value?;
        if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64 {
            Some(value as u32)
        } else {
            self.reject(field, format!("{value} is not a non-negative whole number"));
            None
        }
    }

    fn reject(&mut self, field: &str, message: String) {
        tracing::debug!(row = self.row, student_id = self.student_id, field, %message, "dropping out-of-range value");
        self.warnings.push(RowWarning {
            row: self.row,
            student_id: self.student_id.to_string(),
            field: field.to_string(),
            message,
        });
    }
}
