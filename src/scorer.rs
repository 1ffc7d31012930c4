//! Risk scoring
//!
//! Applies a [`TrainedModel`] to feature vectors built against its frozen
//! feature list. Scoring is pure: the same model and vector always produce
//! the same [`RiskScore`].

use crate::error::RiskError;
use crate::labels::{Comparison, RuleCondition, RuleSet};
use crate::model::TrainedModel;
use crate::types::{ContributingSignal, FeatureVector, RiskScore, RiskTier};
use serde::{Deserialize, Serialize};

/// Probability cut-points between tiers, lower edge inclusive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierCutPoints {
    pub medium_from: f64,
    pub high_from: f64,
}

impl Default for TierCutPoints {
    fn default() -> Self {
        Self {
            medium_from: 0.10,
            high_from: 0.80,
        }
    }
}

impl TierCutPoints {
    pub fn tier(&self, probability: f64) -> RiskTier {
        if probability >= self.high_from {
            RiskTier::High
        } else if probability >= self.medium_from {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let in_range = |p: f64| (0.0..=1.0).contains(&p);
        if !in_range(self.medium_from) || !in_range(self.high_from) {
            return Err("tier cut-points must lie in [0, 1]".to_string());
        }
        if self.medium_from > self.high_from {
            return Err(format!(
                "medium_from ({}) must not exceed high_from ({})",
                self.medium_from, self.high_from
            ));
        }
        Ok(())
    }
}

/// Scores feature vectors against one model
#[derive(Debug, Clone)]
pub struct RiskScorer<'a> {
    model: &'a TrainedModel,
    thresholds: Vec<RuleCondition>,
    cut_points: TierCutPoints,
}

impl<'a> RiskScorer<'a> {
    /// Rules are used only to explain scores, never to change them
    pub fn new(model: &'a TrainedModel, rules: &RuleSet, cut_points: TierCutPoints) -> Self {
        Self {
            model,
            thresholds: rules.field_thresholds(),
            cut_points,
        }
    }

    pub fn model(&self) -> &TrainedModel {
        self.model
    }

    pub fn score(&self, vector: &FeatureVector) -> Result<RiskScore, RiskError> {
        self.model.check_vector(vector)?;

        let probability = self.model.predict_probability(&vector.values)?;
        Ok(RiskScore {
            student_id: vector.student_id.clone(),
            term: vector.term,
            probability,
            tier: self.cut_points.tier(probability),
            contributing_signals: self.signals(vector),
        })
    }

    pub fn score_all(&self, vectors: &[FeatureVector]) -> Result<Vec<RiskScore>, RiskError> {
        vectors.iter().map(|v| self.score(v)).collect()
    }

    /// Observed raw values past their rule threshold, largest breach first
    fn signals(&self, vector: &FeatureVector) -> Vec<ContributingSignal> {
        let mut signals: Vec<(usize, ContributingSignal)> = self
            .thresholds
            .iter()
            .filter_map(|condition| {
                let name = condition.field.as_str();
                let position = vector.names.iter().position(|n| n == name)?;
                let value = vector.observed(name)?;
                if !condition.is_met_by(value) {
                    return None;
                }
                let distance = match condition.comparison {
                    Comparison::LessThan => condition.threshold - value,
                    Comparison::GreaterThan => value - condition.threshold,
                };
                Some((
                    position,
                    ContributingSignal {
                        feature: name.to_string(),
                        value,
                        threshold: condition.threshold,
                        breach: distance / condition.threshold.abs().max(1.0),
                    },
                ))
            })
            .collect();

        signals.sort_by(|(pa, a), (pb, b)| b.breach.total_cmp(&a.breach).then(pa.cmp(pb)));
        signals.into_iter().map(|(_, s)| s).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::sample_model;
    use crate::types::{Season, Term};

    fn vector(model: &TrainedModel, score: f64, incidents: f64) -> FeatureVector {
        FeatureVector {
            student_id: "STU-1".to_string(),
            term: Term::new(Season::Spring, 2025),
            names: model.feature_names.clone(),
            values: vec![score, incidents],
            imputed: vec![false, false],
        }
    }

    #[test]
    fn test_tier_boundaries_are_lower_inclusive() {
        let cuts = TierCutPoints::default();
        assert_eq!(cuts.tier(0.0), RiskTier::Low);
        assert_eq!(cuts.tier(0.0999), RiskTier::Low);
        assert_eq!(cuts.tier(0.10), RiskTier::Medium);
        assert_eq!(cuts.tier(0.7999), RiskTier::Medium);
        assert_eq!(cuts.tier(0.80), RiskTier::High);
        assert_eq!(cuts.tier(1.0), RiskTier::High);
    }

    #[test]
    fn test_cut_point_validation() {
        assert!(TierCutPoints::default().validate().is_ok());
        let inverted = TierCutPoints {
            medium_from: 0.9,
            high_from: 0.5,
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_score_matches_model_probability() {
        let model = sample_model();
        let scorer = RiskScorer::new(&model, &RuleSet::default(), TierCutPoints::default());
        let v = vector(&model, 55.0, 0.0);

        let score = scorer.score(&v).unwrap();
        assert_eq!(score.probability, model.predict_probability(&v.values).unwrap());
        assert_eq!(score.tier, TierCutPoints::default().tier(score.probability));
        assert_eq!(score.student_id, "STU-1");
    }

    #[test]
    fn test_feature_mismatch_is_hard_error() {
        let model = sample_model();
        let scorer = RiskScorer::new(&model, &RuleSet::default(), TierCutPoints::default());
        let mut v = vector(&model, 55.0, 0.0);
        v.names.reverse();

        assert!(matches!(
            scorer.score(&v),
            Err(RiskError::FeatureMismatch { .. })
        ));
    }

    #[test]
    fn test_short_vector_with_matching_names_is_rejected() {
        let model = sample_model();
        let scorer = RiskScorer::new(&model, &RuleSet::default(), TierCutPoints::default());

        let mut short_values = vector(&model, 55.0, 0.0);
        short_values.values.truncate(1);
        assert!(matches!(
            scorer.score(&short_values),
            Err(RiskError::VectorLength {
                expected: 2,
                actual: 1
            })
        ));

        let mut short_mask = vector(&model, 55.0, 0.0);
        short_mask.imputed.clear();
        assert!(matches!(
            scorer.score(&short_mask),
            Err(RiskError::VectorLength {
                expected: 2,
                actual: 0
            })
        ));
    }

    #[test]
    fn test_signals_sorted_by_breach() {
        let model = sample_model();
        let scorer = RiskScorer::new(&model, &RuleSet::default(), TierCutPoints::default());

        // score: (70 - 63) / 70 = 0.1; incidents: (4 - 2) / 2 = 1.0
        let score = scorer.score(&vector(&model, 63.0, 4.0)).unwrap();
        let features: Vec<&str> = score
            .contributing_signals
            .iter()
            .map(|s| s.feature.as_str())
            .collect();
        assert_eq!(features, vec!["disciplinary_incidents", "final_score"]);
        assert!((score.contributing_signals[0].breach - 1.0).abs() < 1e-12);
        assert!((score.contributing_signals[1].breach - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_imputed_values_are_not_signals() {
        let model = sample_model();
        let scorer = RiskScorer::new(&model, &RuleSet::default(), TierCutPoints::default());
        let mut v = vector(&model, 40.0, 0.0);
        v.imputed[0] = true;

        assert!(scorer.score(&v).unwrap().contributing_signals.is_empty());
    }

    #[test]
    fn test_more_incidents_never_lowers_probability() {
        let model = sample_model();
        let scorer = RiskScorer::new(&model, &RuleSet::default(), TierCutPoints::default());

        let mut previous = 0.0;
        for incidents in 0..10 {
            let p = scorer
                .score(&vector(&model, 72.0, f64::from(incidents)))
                .unwrap()
                .probability;
            assert!(p >= previous);
            previous = p;
        }
    }
}
