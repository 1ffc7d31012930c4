//! Model training
//!
//! Fits an L2-regularized, class-weighted logistic regression over a labeled
//! feature matrix:
//! - Seeded stratified train/validation split, skipped for tiny inputs
//! - Standardization fitted on the train partition only
//! - Balanced class weights, since synthesized labels are usually skewed
//! - Optional sign constraints that keep each numeric coefficient pointing
//!   the way its labeling rule does
//!
//! The optimizer is a projected Newton method with a backtracking line search,
//! with the array math on `ndarray` and the Newton system factored by
//! `nalgebra`. Every step is a deterministic function of the input order and
//! the seed.

use crate::error::RiskError;
use crate::features::FeatureSchema;
use crate::labels::{Comparison, RuleSet};
use crate::metrics::ValidationMetrics;
use crate::model::{sigmoid, ClassCounts, ConfidenceFlag, TrainedModel, ARTIFACT_FORMAT_VERSION};
use crate::normalizer::Standardizer;
use crate::types::{FeatureVector, NumericField};
use chrono::Utc;
use nalgebra::{DMatrix, DVector};
use ndarray::{s, Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Training configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Share of examples held out for validation
    pub validation_fraction: f64,
    /// Below this many examples the split is skipped
    pub min_examples_for_split: usize,
    /// Below this many examples training is refused
    pub min_training_examples: usize,
    /// Held-out partitions smaller than this are flagged
    pub min_validation_examples: usize,
    pub seed: u64,
    /// Inverse of regularization strength C
    pub l2_penalty: f64,
    pub max_iterations: usize,
    /// Convergence threshold on the largest parameter change
    pub tolerance: f64,
    /// Constrain numeric coefficients to the direction of their labeling rule
    pub monotone_constraints: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            validation_fraction: 0.3,
            min_examples_for_split: 4,
            min_training_examples: 2,
            min_validation_examples: 5,
            seed: 42,
            l2_penalty: 1.0,
            max_iterations: 100,
            tolerance: 1e-9,
            monotone_constraints: true,
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..1.0).contains(&self.validation_fraction) {
            return Err(format!(
                "validation_fraction must be in [0, 1), got {}",
                self.validation_fraction
            ));
        }
        if self.min_training_examples < 2 {
            return Err("min_training_examples must be at least 2".to_string());
        }
        if !(self.l2_penalty.is_finite() && self.l2_penalty > 0.0) {
            return Err(format!("l2_penalty must be positive, got {}", self.l2_penalty));
        }
        if self.max_iterations == 0 {
            return Err("max_iterations must be at least 1".to_string());
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(format!("tolerance must be positive, got {}", self.tolerance));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignConstraint {
    NonPositive,
    NonNegative,
}

impl SignConstraint {
    fn project(&self, value: f64) -> f64 {
        match self {
            SignConstraint::NonPositive => value.min(0.0),
            SignConstraint::NonNegative => value.max(0.0),
        }
    }

    /// At the bound with the gradient pushing further out of the feasible set
    fn blocks(&self, value: f64, gradient: f64) -> bool {
        match self {
            SignConstraint::NonPositive => value >= 0.0 && gradient < 0.0,
            SignConstraint::NonNegative => value <= 0.0 && gradient > 0.0,
        }
    }
}

/// Fits [`TrainedModel`]s
#[derive(Debug, Clone, Default)]
pub struct ModelTrainer {
    config: TrainerConfig,
    rules: RuleSet,
}

impl ModelTrainer {
    /// The rule set supplies the coefficient directions for monotone constraints
    pub fn new(config: TrainerConfig, rules: RuleSet) -> Result<Self, RiskError> {
        config
            .validate()
            .map_err(|reason| RiskError::InvalidConfig(format!("trainer: {reason}")))?;
        Ok(Self { config, rules })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Train a model on feature vectors built against `schema`.
    ///
    /// Fails with [`RiskError::InsufficientData`] or
    /// [`RiskError::DegenerateLabels`] before any fitting happens.
    pub fn train(
        &self,
        schema: &FeatureSchema,
        vectors: &[FeatureVector],
        labels: &[u8],
        low_confidence_labels: usize,
    ) -> Result<TrainedModel, RiskError> {
        if vectors.len() != labels.len() {
            return Err(RiskError::LabelCountMismatch {
                expected: vectors.len(),
                actual: labels.len(),
            });
        }

        let width = schema.len();
        for vector in vectors {
            if vector.names.as_slice() != schema.names() {
                return Err(RiskError::FeatureMismatch {
                    expected: schema.names().to_vec(),
                    actual: vector.names.clone(),
                });
            }
            if let Some(actual) = [vector.values.len(), vector.imputed.len()]
                .into_iter()
                .find(|&len| len != width)
            {
                return Err(RiskError::VectorLength {
                    expected: width,
                    actual,
                });
            }
        }

        let n = labels.len();
        let at_risk = self.check_labels(labels)?;

        let mut flags = Vec::new();

        let (train_idx, val_idx) = if n < self.config.min_examples_for_split {
            flags.push(ConfidenceFlag::SplitSkipped);
            ((0..n).collect::<Vec<_>>(), Vec::new())
        } else {
            stratified_split(labels, self.config.validation_fraction, self.config.seed)
        };

        let (schema, vectors) = schema.refit_imputation(vectors, &train_idx);
        let matrix = |rows: &[usize]| {
            Array2::from_shape_fn((rows.len(), width), |(i, j)| vectors[rows[i]].values[j])
        };

        let train_matrix = matrix(&train_idx);
        let train_labels: Vec<u8> = train_idx.iter().map(|&i| labels[i]).collect();

        let scaling = Standardizer::fit(&train_matrix);
        let scaled = scaling.transform_matrix(&train_matrix)?;

        let objective = Objective::new(
            &scaled,
            &train_labels,
            Array1::from(balanced_weights(&train_labels)),
            self.config.l2_penalty,
        );
        let fit = fit_logistic(&objective, &self.constraints(&schema), &self.config);
        if !fit.converged {
            flags.push(ConfidenceFlag::NotConverged {
                iterations: fit.iterations,
            });
        }

        let validation = if val_idx.is_empty() {
            if !flags.contains(&ConfidenceFlag::SplitSkipped) {
                flags.push(ConfidenceFlag::ValidationTooSmall { examples: 0 });
            }
            None
        } else {
            let logits = scaling.transform_matrix(&matrix(&val_idx))?.dot(&fit.weights) + fit.intercept;
            let predictions: Vec<u8> = logits.iter().map(|&z| u8::from(sigmoid(z) >= 0.5)).collect();
            let truth: Vec<u8> = val_idx.iter().map(|&i| labels[i]).collect();
            let metrics = ValidationMetrics::compute(&predictions, &truth)?;

            if metrics.examples < self.config.min_validation_examples {
                flags.push(ConfidenceFlag::ValidationTooSmall {
                    examples: metrics.examples,
                });
            }
            if !metrics.has_both_classes() {
                flags.push(ConfidenceFlag::ValidationSingleClass);
            }
            Some(metrics)
        };

        if low_confidence_labels > 0 {
            flags.push(ConfidenceFlag::LowConfidenceLabels {
                count: low_confidence_labels,
            });
        }

        let low_confidence = !flags.is_empty();
        if low_confidence {
            tracing::warn!(flags = ?flags, "model marked low-confidence");
        }
        tracing::info!(
            examples = n,
            train = train_idx.len(),
            validation = val_idx.len(),
            iterations = fit.iterations,
            low_confidence,
            "model trained"
        );

        Ok(TrainedModel {
            format_version: ARTIFACT_FORMAT_VERSION,
            model_id: Uuid::new_v4(),
            trained_at: Utc::now(),
            feature_names: schema.names().to_vec(),
            imputation_values: schema.imputation_values().to_vec(),
            scaling,
            coefficients: fit.weights.to_vec(),
            intercept: fit.intercept,
            training_examples: n,
            class_counts: ClassCounts {
                not_at_risk: n - at_risk,
                at_risk,
            },
            low_confidence,
            confidence_flags: flags,
            validation,
            seed: self.config.seed,
        })
    }

    /// Reject label sets that cannot train a classifier.
    ///
    /// Too few examples is checked before a single class. Returns the number
    /// of at-risk labels.
    pub fn check_labels(&self, labels: &[u8]) -> Result<usize, RiskError> {
        let n = labels.len();
        let required = self.config.min_training_examples.max(2);
        let Some(&first) = labels.first().filter(|_| n >= required) else {
            tracing::warn!(examples = n, "not enough examples to train");
            return Err(RiskError::InsufficientData {
                available: n,
                required,
            });
        };

        let at_risk = labels.iter().filter(|&&l| l == 1).count();
        if at_risk == 0 || at_risk == n {
            tracing::warn!(examples = n, at_risk, "all synthesized labels share one class");
            return Err(RiskError::DegenerateLabels {
                label: first,
                count: n,
            });
        }
        Ok(at_risk)
    }

    fn constraints(&self, schema: &FeatureSchema) -> Vec<Option<SignConstraint>> {
        if !self.config.monotone_constraints {
            return vec![None; schema.len()];
        }
        let directions = self.rules.field_thresholds();
        schema
            .names()
            .iter()
            .map(|name| {
                let field = NumericField::from_name(name)?;
                let condition = directions.iter().find(|c| c.field == field)?;
                Some(match condition.comparison {
                    Comparison::LessThan => SignConstraint::NonPositive,
                    Comparison::GreaterThan => SignConstraint::NonNegative,
                })
            })
            .collect()
    }
}

/// Seeded per-class shuffle; each class keeps at least one training example
fn stratified_split(labels: &[u8], fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let (mut negatives, mut positives): (Vec<usize>, Vec<usize>) =
        (0..labels.len()).partition(|&i| labels[i] == 0);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    negatives.shuffle(&mut rng);
    positives.shuffle(&mut rng);

    let hold_out = |len: usize| ((len as f64 * fraction).round() as usize).min(len.saturating_sub(1));
    let val_neg = hold_out(negatives.len());
    let val_pos = hold_out(positives.len());

    let mut val: Vec<usize> = negatives[..val_neg]
        .iter()
        .chain(positives[..val_pos].iter())
        .copied()
        .collect();
    let mut train: Vec<usize> = negatives[val_neg..]
        .iter()
        .chain(positives[val_pos..].iter())
        .copied()
        .collect();

    train.sort_unstable();
    val.sort_unstable();
    (train, val)
}

/// Weight each class inversely to its frequency: `n / (2 * n_class)`
fn balanced_weights(labels: &[u8]) -> Vec<f64> {
    let n = labels.len() as f64;
    let positives = labels.iter().filter(|&&l| l == 1).count() as f64;
    let negatives = n - positives;
    labels
        .iter()
        .map(|&l| {
            let count = if l == 1 { positives } else { negatives };
            n / (2.0 * count)
        })
        .collect()
}

/// log(1 + e^z) without overflow
fn softplus(z: f64) -> f64 {
    z.max(0.0) + (-z.abs()).exp().ln_1p()
}

struct Fit {
    weights: Array1<f64>,
    intercept: f64,
    iterations: usize,
    converged: bool,
}

impl Fit {
    /// Split `[w_0 .. w_{d-1}, b]` into weights and intercept
    fn from_parameters(theta: Array1<f64>, iterations: usize, converged: bool) -> Self {
        let width = theta.len() - 1;
        Self {
            weights: theta.slice(s![..width]).to_owned(),
            intercept: theta[width],
            iterations,
            converged,
        }
    }
}

/// Weighted, L2-penalized logistic loss over standardized rows.
///
/// The design matrix carries a trailing column of ones, so parameters are
/// laid out as `[w_0 .. w_{d-1}, b]`; the intercept is not penalized. The
/// loss is normalized by the total sample weight.
struct Objective {
    design: Array2<f64>,
    labels: Array1<f64>,
    sample_weights: Array1<f64>,
    penalty: Array1<f64>,
    total_weight: f64,
}

impl Objective {
    fn new(scaled: &Array2<f64>, labels: &[u8], sample_weights: Array1<f64>, l2: f64) -> Self {
        let (rows, width) = scaled.dim();
        let design = Array2::from_shape_fn((rows, width + 1), |(i, j)| {
            if j < width {
                scaled[[i, j]]
            } else {
                1.0
            }
        });
        let mut penalty = Array1::from_elem(width + 1, l2);
        penalty[width] = 0.0;

        Self {
            design,
            labels: labels.iter().map(|&l| f64::from(l)).collect(),
            total_weight: sample_weights.sum(),
            sample_weights,
            penalty,
        }
    }

    fn width(&self) -> usize {
        self.penalty.len() - 1
    }

    fn value(&self, theta: &Array1<f64>) -> f64 {
        let z = self.design.dot(theta);
        let loss = (&self.sample_weights * &(z.mapv(softplus) - &self.labels * &z)).sum();
        let penalty = (&self.penalty * &theta.mapv(|t| t * t)).sum();
        (loss + 0.5 * penalty) / self.total_weight
    }

    /// Gradient and Hessian at `theta`
    fn derivatives(&self, theta: &Array1<f64>) -> (Array1<f64>, Array2<f64>) {
        let prob = self.design.dot(theta).mapv(sigmoid);
        let residual = &self.sample_weights * &(&prob - &self.labels);
        let curvature = &self.sample_weights * &prob.mapv(|p| p * (1.0 - p));

        let gradient = (self.design.t().dot(&residual) + &self.penalty * theta) / self.total_weight;

        let weighted = &self.design * &curvature.insert_axis(Axis(1));
        let mut hessian = self.design.t().dot(&weighted);
        hessian
            .diag_mut()
            .zip_mut_with(&self.penalty, |h, &l2| *h += l2);
        hessian /= self.total_weight;
        hessian.diag_mut().mapv_inplace(|h| h + 1e-12);

        (gradient, hessian)
    }
}

fn fit_logistic(
    objective: &Objective,
    constraints: &[Option<SignConstraint>],
    config: &TrainerConfig,
) -> Fit {
    let width = objective.width();
    let project = |theta: &mut Array1<f64>| {
        for (value, constraint) in theta.iter_mut().zip(constraints) {
            if let Some(c) = constraint {
                *value = c.project(*value);
            }
        }
    };

    let mut theta = Array1::<f64>::zeros(width + 1);
    let mut current = objective.value(&theta);

    for iteration in 1..=config.max_iterations {
        let (gradient, hessian) = objective.derivatives(&theta);

        let free: Vec<usize> = (0..=width)
            .filter(|&j| {
                j == width
                    || !constraints[j].is_some_and(|c| c.blocks(theta[j], gradient[j]))
            })
            .collect();
        let direction = newton_direction(&hessian, &gradient, &free);

        let mut full_step = &theta + &direction;
        project(&mut full_step);
        let newton_length = max_abs_diff(&full_step, &theta);
        if newton_length < config.tolerance {
            return Fit::from_parameters(theta, iteration, true);
        }

        let mut accepted = None;
        let mut t = 1.0;
        for _ in 0..50 {
            let mut candidate = &theta + &(&direction * t);
            project(&mut candidate);
            let candidate_value = objective.value(&candidate);

            let decrease = gradient.dot(&(&candidate - &theta));
            if candidate_value <= current + 1e-4 * decrease {
                accepted = Some((candidate, candidate_value));
                break;
            }
            t *= 0.5;
        }

        let Some((candidate, candidate_value)) = accepted else {
            // Below the square root of the tolerance the objective no longer
            // resolves the decrease, and the next Newton step would already
            // be under tolerance
            let converged = newton_length < config.tolerance.sqrt();
            tracing::debug!(iteration, newton_length, converged, "line search found no sufficient decrease");
            return Fit::from_parameters(theta, iteration, converged);
        };

        let step = max_abs_diff(&candidate, &theta);
        theta = candidate;
        current = candidate_value;
        if step < config.tolerance {
            return Fit::from_parameters(theta, iteration, true);
        }
    }

    Fit::from_parameters(theta, config.max_iterations, false)
}

/// Newton step over the free parameters; blocked ones stay put.
///
/// Falls back to LU when the reduced Hessian is not positive definite, and to
/// steepest descent when it is singular.
fn newton_direction(hessian: &Array2<f64>, gradient: &Array1<f64>, free: &[usize]) -> Array1<f64> {
    let k = free.len();
    let reduced = DMatrix::from_fn(k, k, |i, j| hessian[[free[i], free[j]]]);
    let rhs = DVector::from_iterator(k, free.iter().map(|&j| -gradient[j]));

    let step = match reduced.clone().cholesky() {
        Some(cholesky) => Some(cholesky.solve(&rhs)),
        None => reduced.lu().solve(&rhs),
    }
    .filter(|x| x.iter().all(|v| v.is_finite()))
    .unwrap_or(rhs);

    let mut direction = Array1::<f64>::zeros(gradient.len());
    for (&j, d) in free.iter().zip(step.iter()) {
        direction[j] = *d;
    }
    direction
}

fn max_abs_diff(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}
