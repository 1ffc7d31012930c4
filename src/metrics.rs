//! Validation metrics for the trained classifier
//!
//! Confusion-matrix metrics computed on the held-out partition. On the small
//! partitions this pipeline sees, they are reported alongside confidence
//! flags rather than as a verdict.

use crate::error::RiskError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metrics from a confusion matrix. Class 1 = at-risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub examples: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    pub fn_count: usize,
}

impl ValidationMetrics {
    /// Compute metrics from predicted and synthesized labels, paired by position
    pub fn compute(predictions: &[u8], labels: &[u8]) -> Result<Self, RiskError> {
        if predictions.len() != labels.len() {
            return Err(RiskError::LabelCountMismatch {
                expected: predictions.len(),
                actual: labels.len(),
            });
        }

        let mut tp = 0;
        let mut fp = 0;
        let mut tn = 0;
        let mut fn_count = 0;

        for (&pred, &label) in predictions.iter().zip(labels.iter()) {
            match (pred, label) {
                (1, 1) => tp += 1,
                (1, _) => fp += 1,
                (_, 1) => fn_count += 1,
                _ => tn += 1,
            }
        }

        let total = tp + fp + tn + fn_count;
        let ratio = |num: usize, den: usize| if den > 0 { num as f64 / den as f64 } else { 0.0 };

        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_count);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Ok(Self {
            examples: total,
            accuracy: ratio(tp + tn, total),
            precision,
            recall,
            f1,
            tp,
            fp,
            tn,
            fn_count,
        })
    }

    /// Whether both classes appear among the true labels
    pub fn has_both_classes(&self) -> bool {
        self.tp + self.fn_count > 0 && self.tn + self.fp > 0
    }
}

impl fmt::Display for ValidationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} acc={:.3} prec={:.3} rec={:.3} f1={:.3} [tp={} fp={} tn={} fn={}]",
            self.examples,
            self.accuracy,
            self.precision,
            self.recall,
            self.f1,
            self.tp,
            self.fp,
            self.tn,
            self.fn_count,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_counts() {
        let m = ValidationMetrics::compute(&[1, 1, 0, 0, 1], &[1, 0, 0, 1, 1]).unwrap();
        assert_eq!((m.tp, m.fp, m.tn, m.fn_count), (2, 1, 1, 1));
        assert!((m.accuracy - 0.6).abs() < 1e-12);
        assert!((m.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.recall - 2.0 / 3.0).abs() < 1e-12);
        assert!(m.has_both_classes());
    }

    #[test]
    fn test_single_class_is_detectable() {
        let m = ValidationMetrics::compute(&[0, 0], &[0, 0]).unwrap();
        assert_eq!(m.accuracy, 1.0);
        assert!(!m.has_both_classes());
    }

    #[test]
    fn test_empty_partition() {
        let m = ValidationMetrics::compute(&[], &[]).unwrap();
        assert_eq!(m.examples, 0);
        assert_eq!(m.accuracy, 0.0);
        assert_eq!(m.f1, 0.0);
    }

    #[test]
    fn test_length_mismatch_is_an_error() {
        assert!(matches!(
            ValidationMetrics::compute(&[1, 0, 1], &[1, 0]),
            Err(RiskError::LabelCountMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }
}
