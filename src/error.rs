//! Error types for cohort-risk
//!
//! Row-level problems ([`SchemaError`]) are recovered by dropping the row and
//! counting it. Everything in [`RiskError`] aborts the operation that raised it.

use thiserror::Error;

/// Errors that abort a training, loading or scoring operation
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Insufficient training data: {available} usable examples, at least {required} required")]
    InsufficientData { available: usize, required: usize },

    #[error("Degenerate labels: all {count} synthesized labels are {label}; review the labeling rules")]
    DegenerateLabels { label: u8, count: usize },

    #[error("Feature mismatch: model expects [{}], got [{}]", expected.join(", "), actual.join(", "))]
    FeatureMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Feature vector has {actual} entries where the feature list has {expected}")]
    VectorLength { expected: usize, actual: usize },

    #[error("Got {actual} labels for {expected} examples")]
    LabelCountMismatch { expected: usize, actual: usize },

    #[error("No usable features could be derived from the training records")]
    NoFeatures,

    #[error("Unknown feature name: {0}")]
    UnknownFeature(String),

    #[error("Incompatible model artifact: {0}")]
    IncompatibleArtifact(String),

    #[error("No model loaded; train or load one first")]
    NoModel,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that make a single input row unusable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("Row {row}: missing student_id")]
    MissingStudentId { row: usize },

    #[error("Row {row}: missing term for student {student_id}")]
    MissingTerm { row: usize, student_id: String },

    #[error("Row {row}: unrecognized term '{term}' for student {student_id}")]
    InvalidTerm {
        row: usize,
        student_id: String,
        term: String,
    },

    #[error("Row {row}: duplicate record for student {student_id} in {term}")]
    DuplicateRecord {
        row: usize,
        student_id: String,
        term: String,
    },
}

impl SchemaError {
    /// Zero-based index of the offending input row
    pub fn row(&self) -> usize {
        match self {
            SchemaError::MissingStudentId { row }
            | SchemaError::MissingTerm { row, .. }
            | SchemaError::InvalidTerm { row, .. }
            | SchemaError::DuplicateRecord { row, .. } => *row,
        }
    }
}
