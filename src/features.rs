//! Feature construction
//!
//! Maps student-term records of varying completeness onto a fixed-order
//! numeric vector:
//! - Numeric fields pass through, nulls imputed with the training-set mean
//!   (refitted on the train partition once the trainer has split)
//! - `parental_education` expands into one indicator per training category
//! - The resulting name list is frozen into the model artifact

use crate::error::RiskError;
use crate::types::{FeatureVector, MissingValuePolicyWarning, NumericField, StudentTermRecord};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Prefix of the `parental_education` indicator columns
pub const CATEGORY_PREFIX: &str = "parental_education=";

/// Normalize an open-vocabulary category for use in a column name
pub fn normalize_category(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq)]
enum FeatureColumn {
    Numeric(NumericField),
    Category(String),
}

impl FeatureColumn {
    fn parse(name: &str) -> Option<Self> {
        if let Some(field) = NumericField::from_name(name) {
            return Some(FeatureColumn::Numeric(field));
        }
        name.strip_prefix(CATEGORY_PREFIX)
            .filter(|category| !category.is_empty())
            .map(|category| FeatureColumn::Category(category.to_string()))
    }

    fn name(&self) -> String {
        match self {
            FeatureColumn::Numeric(field) => field.as_str().to_string(),
            FeatureColumn::Category(category) => format!("{CATEGORY_PREFIX}{category}"),
        }
    }
}

/// Frozen feature contract: ordered names plus per-column imputation values
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    columns: Vec<FeatureColumn>,
    names: Vec<String>,
    imputation_values: Vec<f64>,
}

/// Derives [`FeatureSchema`]s from training records
pub struct FeatureBuilder;

impl FeatureBuilder {
    /// Derive the feature schema from training records.
    ///
    /// With an empty `frozen` list the columns are derived from what the
    /// records contain. Otherwise `frozen` dictates the columns and their order
    /// and only the imputation statistics are computed.
    pub fn derive(
        records: &[StudentTermRecord],
        frozen: &[String],
    ) -> Result<FeatureSchema, RiskError> {
        let columns = if frozen.is_empty() {
            derive_columns(records)
        } else {
            parse_columns(frozen)?
        };

        if columns.is_empty() {
            return Err(RiskError::NoFeatures);
        }

        let imputation_values = columns
            .iter()
            .map(|column| match column {
                FeatureColumn::Numeric(field) => column_mean(records, *field),
                FeatureColumn::Category(_) => 0.0,
            })
            .collect();

        let names: Vec<String> = columns.iter().map(FeatureColumn::name).collect();
        tracing::debug!(features = ?names, "derived feature schema");

        Ok(FeatureSchema {
            columns,
            names,
            imputation_values,
        })
    }
}

fn derive_columns(records: &[StudentTermRecord]) -> Vec<FeatureColumn> {
    let mut columns: Vec<FeatureColumn> = NumericField::ALL
        .into_iter()
        .filter(|field| records.iter().any(|r| field.value(r).is_some()))
        .map(FeatureColumn::Numeric)
        .collect();

    let categories: BTreeSet<String> = records
        .iter()
        .filter_map(|r| r.parental_education.as_deref())
        .map(normalize_category)
        .filter(|c| !c.is_empty())
        .collect();
    columns.extend(categories.into_iter().map(FeatureColumn::Category));

    columns
}

fn parse_columns(names: &[String]) -> Result<Vec<FeatureColumn>, RiskError> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|name| {
            if !seen.insert(name.as_str()) {
                return Err(RiskError::InvalidConfig(format!(
                    "feature '{name}' listed more than once"
                )));
            }
            FeatureColumn::parse(name).ok_or_else(|| RiskError::UnknownFeature(name.clone()))
        })
        .collect()
}

fn column_mean(records: &[StudentTermRecord], field: NumericField) -> f64 {
    let (sum, count) = records
        .iter()
        .filter_map(|r| field.value(r))
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));

    if count == 0 {
        tracing::warn!(feature = field.as_str(), "no observed values; imputing 0.0");
        0.0
    } else {
        sum / count as f64
    }
}

impl FeatureSchema {
    /// Rebuild a schema from a persisted name list and imputation values
    pub fn from_parts(names: Vec<String>, imputation_values: Vec<f64>) -> Result<Self, RiskError> {
        if names.len() != imputation_values.len() {
            return Err(RiskError::IncompatibleArtifact(format!(
                "{} feature names but {} imputation values",
                names.len(),
                imputation_values.len()
            )));
        }
        let columns = parse_columns(&names)?;
        Ok(Self {
            columns,
            names,
            imputation_values,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn imputation_values(&self) -> &[f64] {
        &self.imputation_values
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Build the feature vector for one record.
    ///
    /// Returns a warning for every imputed value. A category that was not seen
    /// at training time leaves all indicators at zero and is not an imputation.
    pub fn build(
        &self,
        record: &StudentTermRecord,
    ) -> (FeatureVector, Vec<MissingValuePolicyWarning>) {
        let category = record
            .parental_education
            .as_deref()
            .map(normalize_category)
            .filter(|c| !c.is_empty());

        let mut values = Vec::with_capacity(self.columns.len());
        let mut imputed = Vec::with_capacity(self.columns.len());
        let mut warnings = Vec::new();
        let mut category_missing = false;

        for (i, column) in self.columns.iter().enumerate() {
            match column {
                FeatureColumn::Numeric(field) => match field.value(record) {
                    Some(v) => {
                        values.push(v);
                        imputed.push(false);
                    }
                    None => {
                        let fill = self.imputation_values[i];
                        values.push(fill);
                        imputed.push(true);
                        warnings.push(MissingValuePolicyWarning {
                            student_id: record.student_id.clone(),
                            term: record.term,
                            feature: self.names[i].clone(),
                            imputed_value: fill,
                        });
                    }
                },
                FeatureColumn::Category(name) => match &category {
                    Some(c) => {
                        values.push(if c == name { 1.0 } else { 0.0 });
                        imputed.push(false);
                    }
                    None => {
                        values.push(self.imputation_values[i]);
                        imputed.push(true);
                        category_missing = true;
                    }
                },
            }
        }

        if category_missing {
            warnings.push(MissingValuePolicyWarning {
                student_id: record.student_id.clone(),
                term: record.term,
                feature: "parental_education".to_string(),
                imputed_value: 0.0,
            });
        }

        let vector = FeatureVector {
            student_id: record.student_id.clone(),
            term: record.term,
            names: self.names.clone(),
            values,
            imputed,
        };
        (vector, warnings)
    }

    /// Refit the numeric imputation values on the observed entries of
    /// `rows` only, and refill the imputed numeric entries of every vector.
    ///
    /// A column with no observed value among `rows` keeps its current value.
    /// Category columns always impute 0.0 and are left alone.
    pub fn refit_imputation(
        &self,
        vectors: &[FeatureVector],
        rows: &[usize],
    ) -> (FeatureSchema, Vec<FeatureVector>) {
        let imputation_values: Vec<f64> = self
            .columns
            .iter()
            .enumerate()
            .map(|(j, column)| {
                let current = self.imputation_values[j];
                if !matches!(column, FeatureColumn::Numeric(_)) {
                    return current;
                }
                let (sum, count) = rows
                    .iter()
                    .filter_map(|&i| vectors.get(i))
                    .filter(|v| v.imputed.get(j) == Some(&false))
                    .filter_map(|v| v.values.get(j))
                    .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
                if count == 0 {
                    current
                } else {
                    sum / count as f64
                }
            })
            .collect();

        let refilled = vectors
            .iter()
            .map(|vector| {
                let mut vector = vector.clone();
                for (j, column) in self.columns.iter().enumerate() {
                    let numeric = matches!(column, FeatureColumn::Numeric(_));
                    if numeric && vector.imputed.get(j) == Some(&true) {
                        if let Some(value) = vector.values.get_mut(j) {
                            *value = imputation_values[j];
                        }
                    }
                }
                vector
            })
            .collect();

        let schema = FeatureSchema {
            columns: self.columns.clone(),
            names: self.names.clone(),
            imputation_values,
        };
        (schema, refilled)
    }

    /// Whether a record's category has an indicator column
    pub fn knows_category(&self, raw: &str) -> bool {
        let normalized = normalize_category(raw);
        self.columns
            .iter()
            .any(|c| matches!(c, FeatureColumn::Category(name) if *name == normalized))
    }

    /// Build vectors for a batch, aggregating the imputation warnings
    pub fn build_batch(
        &self,
        records: &[StudentTermRecord],
    ) -> (Vec<FeatureVector>, ImputationSummary) {
        let mut summary = ImputationSummary::default();
        let vectors = records
            .iter()
            .map(|record| {
                let (vector, warnings) = self.build(record);
                for warning in warnings {
                    summary.record(warning);
                }
                if let Some(raw) = record.parental_education.as_deref() {
                    if self.has_categories() && !self.knows_category(raw) {
                        summary.unseen_categories += 1;
                    }
                }
                vector
            })
            .collect();
        (vectors, summary)
    }

    fn has_categories(&self) -> bool {
        self.columns
            .iter()
            .any(|c| matches!(c, FeatureColumn::Category(_)))
    }
}

/// Aggregated [`MissingValuePolicyWarning`] counts for a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImputationSummary {
    pub total: usize,
    pub by_feature: BTreeMap<String, usize>,
    /// Categories observed in the batch with no training-time indicator
    pub unseen_categories: usize,
}

impl ImputationSummary {
    fn record(&mut self, warning: MissingValuePolicyWarning) {
        self.total += 1;
        *self.by_feature.entry(warning.feature).or_insert(0) += 1;
    }
}
