//! Trained model artifact
//!
//! A [`TrainedModel`] is produced once per training run and never mutated;
//! the next run supersedes it. It carries everything inference needs: the
//! frozen feature list, imputation values, scaling statistics and the fitted
//! classifier, plus the metadata that says how far it can be trusted.

use crate::error::RiskError;
use crate::features::FeatureSchema;
use crate::metrics::ValidationMetrics;
use crate::normalizer::Standardizer;
use crate::types::FeatureVector;
use chrono::{DateTime, Utc};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use uuid::Uuid;

/// Current artifact format version
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Why a model was marked low-confidence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "flag", rename_all = "snake_case")]
pub enum ConfidenceFlag {
    /// Too few examples to hold any out; trained on everything
    SplitSkipped,
    /// Held-out partition smaller than the configured minimum
    ValidationTooSmall { examples: usize },
    /// Held-out partition contains one class; its accuracy is meaningless
    ValidationSingleClass,
    /// Some labels were defaults because no rule could be evaluated
    LowConfidenceLabels { count: usize },
    /// The optimizer hit its iteration limit or its line search stalled
    NotConverged { iterations: usize },
}

/// Label counts over all training examples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCounts {
    pub not_at_risk: usize,
    pub at_risk: usize,
}

/// Immutable, versioned model artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub format_version: u32,
    pub model_id: Uuid,
    pub trained_at: DateTime<Utc>,
    /// Frozen feature order
    pub feature_names: Vec<String>,
    /// Training-set value used for nulls, per feature
    pub imputation_values: Vec<f64>,
    /// Train-partition scaling statistics, per feature
    pub scaling: Standardizer,
    /// Coefficients on the standardized scale, per feature
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub training_examples: usize,
    pub class_counts: ClassCounts,
    pub low_confidence: bool,
    pub confidence_flags: Vec<ConfidenceFlag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationMetrics>,
    pub seed: u64,
}

impl TrainedModel {
    /// Rebuild the frozen feature schema for inference
    pub fn feature_schema(&self) -> Result<FeatureSchema, RiskError> {
        FeatureSchema::from_parts(self.feature_names.clone(), self.imputation_values.clone())
    }

    /// Hard check that a feature list matches the frozen one exactly
    pub fn check_features(&self, names: &[String]) -> Result<(), RiskError> {
        if names == self.feature_names.as_slice() {
            Ok(())
        } else {
            Err(RiskError::FeatureMismatch {
                expected: self.feature_names.clone(),
                actual: names.to_vec(),
            })
        }
    }

    /// Hard check that a feature vector was built against the frozen list
    /// and carries one value and one imputation mark per feature
    pub fn check_vector(&self, vector: &FeatureVector) -> Result<(), RiskError> {
        self.check_features(&vector.names)?;
        let expected = self.feature_names.len();
        match [vector.values.len(), vector.imputed.len()]
            .into_iter()
            .find(|&len| len != expected)
        {
            Some(actual) => Err(RiskError::VectorLength { expected, actual }),
            None => Ok(()),
        }
    }

    /// Probability of the at-risk class for raw (unscaled) feature values
    pub fn predict_probability(&self, raw_values: &[f64]) -> Result<f64, RiskError> {
        let scaled = self.scaling.transform(raw_values)?;
        if self.coefficients.len() != scaled.len() {
            return Err(RiskError::IncompatibleArtifact(format!(
                "{} coefficients for {} scaled features",
                self.coefficients.len(),
                scaled.len()
            )));
        }
        let coefficients = ArrayView1::from(self.coefficients.as_slice());
        Ok(sigmoid(self.intercept + scaled.dot(&coefficients)))
    }

    /// Features ranked by absolute standardized coefficient
    pub fn feature_importance(&self) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .feature_names
            .iter()
            .cloned()
            .zip(self.coefficients.iter().copied())
            .collect();
        ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()).then_with(|| a.0.cmp(&b.0)));
        ranked
    }

    /// Structural checks applied when loading an artifact
    pub fn validate(&self) -> Result<(), RiskError> {
        if self.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(RiskError::IncompatibleArtifact(format!(
                "format version {} is not supported (expected {})",
                self.format_version, ARTIFACT_FORMAT_VERSION
            )));
        }

        let width = self.feature_names.len();
        let lengths = [
            ("imputation_values", self.imputation_values.len()),
            ("scaling.means", self.scaling.means.len()),
            ("scaling.scales", self.scaling.scales.len()),
            ("coefficients", self.coefficients.len()),
        ];
        if let Some((field, len)) = lengths.iter().find(|(_, len)| *len != width) {
            return Err(RiskError::IncompatibleArtifact(format!(
                "{field} has {len} entries for {width} features"
            )));
        }

        let finite = self
            .imputation_values
            .iter()
            .chain(self.scaling.means.iter())
            .chain(self.scaling.scales.iter())
            .chain(self.coefficients.iter())
            .chain(std::iter::once(&self.intercept))
            .all(|v| v.is_finite());
        if !finite || self.scaling.scales.iter().any(|s| *s <= 0.0) {
            return Err(RiskError::IncompatibleArtifact(
                "parameters must be finite with positive scales".to_string(),
            ));
        }

        self.feature_schema().map(|_| ())
    }

    /// Load a model from JSON
    pub fn from_json(json: &str) -> Result<Self, RiskError> {
        let model: TrainedModel = serde_json::from_str(json)?;
        model.validate()?;
        Ok(model)
    }

    /// Serialize the model to pretty JSON
    pub fn to_json(&self) -> Result<String, RiskError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a model artifact from disk
    pub fn load(path: &Path) -> Result<Self, RiskError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Write the artifact atomically: a sibling temp file renamed into place
    pub fn save(&self, path: &Path) -> Result<(), RiskError> {
        let json = self.to_json()?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);

        fs::write(&tmp, json)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        tracing::info!(model_id = %self.model_id, path = %path.display(), "model artifact written");
        Ok(())
    }
}

/// Numerically stable logistic function
pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}
