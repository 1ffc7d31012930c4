//! Label synthesis
//!
//! No ground-truth outcome is recorded for students, so training labels are
//! manufactured from an ordered set of heuristic rules. Each rule is a
//! conjunction of threshold predicates over numeric fields; a record is
//! at-risk as soon as one rule fires.

use crate::types::{NumericField, StudentTermRecord, TrainingExample};
use serde::{Deserialize, Serialize};

/// Comparison applied between a field value and its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    LessThan,
    GreaterThan,
}

/// A single `field <op> threshold` predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: NumericField,
    pub comparison: Comparison,
    pub threshold: f64,
}

impl RuleCondition {
    pub fn below(field: NumericField, threshold: f64) -> Self {
        Self {
            field,
            comparison: Comparison::LessThan,
            threshold,
        }
    }

    pub fn above(field: NumericField, threshold: f64) -> Self {
        Self {
            field,
            comparison: Comparison::GreaterThan,
            threshold,
        }
    }

    /// Whether `value` is on the risky side of the threshold
    pub fn is_met_by(&self, value: f64) -> bool {
        match self.comparison {
            Comparison::LessThan => value < self.threshold,
            Comparison::GreaterThan => value > self.threshold,
        }
    }
}

/// A named conjunction of conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRule {
    pub name: String,
    pub conditions: Vec<RuleCondition>,
}

impl LabelRule {
    pub fn new(name: impl Into<String>, conditions: Vec<RuleCondition>) -> Self {
        Self {
            name: name.into(),
            conditions,
        }
    }

    /// Evaluate the rule. `None` when a referenced field is missing.
    pub fn evaluate(&self, record: &StudentTermRecord) -> Option<bool> {
        let mut fired = true;
        for condition in &self.conditions {
            let value = condition.field.value(record)?;
            fired &= condition.is_met_by(value);
        }
        Some(fired && !self.conditions.is_empty())
    }
}

/// Ordered rule collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<LabelRule>,
}

impl Default for RuleSet {
    fn default() -> Self {
        use NumericField::*;

        Self {
            rules: vec![
                LabelRule::new(
                    "low_score_and_attendance",
                    vec![
                        RuleCondition::below(FinalScore, 70.0),
                        RuleCondition::below(AttendancePercentage, 90.0),
                    ],
                ),
                LabelRule::new(
                    "disengaged",
                    vec![
                        RuleCondition::below(AttendancePercentage, 85.0),
                        RuleCondition::below(LmsLoginsPerWeek, 3.0),
                    ],
                ),
                LabelRule::new("failing_score", vec![RuleCondition::below(FinalScore, 60.0)]),
                LabelRule::new(
                    "repeated_incidents",
                    vec![RuleCondition::above(DisciplinaryIncidents, 2.0)],
                ),
            ],
        }
    }
}

impl RuleSet {
    /// The loosest threshold the rules place on each field, with its direction.
    ///
    /// For `LessThan` this is the highest threshold, for `GreaterThan` the lowest.
    /// Fields referenced with both directions keep the first direction seen.
    pub fn field_thresholds(&self) -> Vec<RuleCondition> {
        let mut thresholds: Vec<RuleCondition> = Vec::new();

        for condition in self.rules.iter().flat_map(|r| r.conditions.iter()) {
            match thresholds.iter_mut().find(|t| t.field == condition.field) {
                Some(existing) if existing.comparison == condition.comparison => {
                    existing.threshold = match condition.comparison {
                        Comparison::LessThan => existing.threshold.max(condition.threshold),
                        Comparison::GreaterThan => existing.threshold.min(condition.threshold),
                    };
                }
                Some(_) => {}
                None => thresholds.push(condition.clone()),
            }
        }

        thresholds.sort_by_key(|t| t.field);
        thresholds
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.rules.is_empty() {
            return Err("rule set must contain at least one rule".to_string());
        }
        for rule in &self.rules {
            if rule.conditions.is_empty() {
                return Err(format!("rule '{}' has no conditions", rule.name));
            }
            if let Some(c) = rule.conditions.iter().find(|c| !c.threshold.is_finite()) {
                return Err(format!("rule '{}' has a non-finite threshold on {}", rule.name, c.field));
            }
        }
        Ok(())
    }
}

/// How much a synthesized label can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelConfidence {
    Normal,
    /// No rule could be evaluated; the `0` label is a default, not a finding
    Low,
}

/// Result of labeling one record
#[derive(Debug, Clone, PartialEq)]
pub struct LabelOutcome {
    pub label: u8,
    /// Name of the rule that fired, if any
    pub fired_rule: Option<String>,
    /// Rules whose fields were all present and that were therefore evaluated
    pub rules_evaluated: usize,
    pub confidence: LabelConfidence,
}

/// Applies a [`RuleSet`] to records
#[derive(Debug, Clone, Default)]
pub struct LabelSynthesizer {
    rules: RuleSet,
}

impl LabelSynthesizer {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Label one record. Never fails: rules with missing inputs are skipped.
    pub fn label(&self, record: &StudentTermRecord) -> LabelOutcome {
        let mut rules_evaluated = 0;

        for rule in &self.rules.rules {
            match rule.evaluate(record) {
                Some(true) => {
                    return LabelOutcome {
                        label: 1,
                        fired_rule: Some(rule.name.clone()),
                        rules_evaluated: rules_evaluated + 1,
                        confidence: LabelConfidence::Normal,
                    };
                }
                Some(false) => rules_evaluated += 1,
                None => {}
            }
        }

        let confidence = if rules_evaluated == 0 {
            tracing::warn!(
                student_id = %record.student_id,
                term = %record.term,
                "no labeling rule could be evaluated; defaulting to not-at-risk with low confidence"
            );
            LabelConfidence::Low
        } else {
            LabelConfidence::Normal
        };

        LabelOutcome {
            label: 0,
            fired_rule: None,
            rules_evaluated,
            confidence,
        }
    }

    /// Label a batch, returning the examples and the number of low-confidence labels
    pub fn synthesize(&self, records: &[StudentTermRecord]) -> (Vec<TrainingExample>, usize) {
        let mut low_confidence = 0;
        let examples = records
            .iter()
            .map(|record| {
                let outcome = self.label(record);
                if outcome.confidence == LabelConfidence::Low {
                    low_confidence += 1;
                }
                TrainingExample {
                    record: record.clone(),
                    label: outcome.label,
                }
            })
            .collect();
        (examples, low_confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Season, Term};

    fn record(
        score: Option<f64>,
        attendance: Option<f64>,
        lms: Option<u32>,
        incidents: Option<u32>,
    ) -> StudentTermRecord {
        StudentTermRecord {
            final_score: score,
            attendance_percentage: attendance,
            lms_logins_per_week: lms,
            disciplinary_incidents: incidents,
            ..StudentTermRecord::new("STU-1", Term::new(Season::Spring, 2025))
        }
    }

    #[test]
    fn test_each_rule_fires_on_its_own() {
        let synth = LabelSynthesizer::default();

        let outcome = synth.label(&record(Some(65.0), Some(88.0), Some(5), Some(0)));
        assert_eq!(outcome.label, 1);
        assert_eq!(outcome.fired_rule.as_deref(), Some("low_score_and_attendance"));

        let outcome = synth.label(&record(Some(80.0), Some(80.0), Some(2), Some(0)));
        assert_eq!(outcome.fired_rule.as_deref(), Some("disengaged"));

        let outcome = synth.label(&record(Some(55.0), Some(98.0), Some(9), Some(0)));
        assert_eq!(outcome.fired_rule.as_deref(), Some("failing_score"));

        let outcome = synth.label(&record(Some(95.0), Some(99.0), Some(9), Some(3)));
        assert_eq!(outcome.fired_rule.as_deref(), Some("repeated_incidents"));
    }

    #[test]
    fn test_healthy_record_is_not_at_risk() {
        let outcome = LabelSynthesizer::default().label(&record(Some(90.0), Some(99.0), Some(8), Some(0)));
        assert_eq!(outcome.label, 0);
        assert_eq!(outcome.rules_evaluated, 4);
        assert_eq!(outcome.confidence, LabelConfidence::Normal);
    }

    #[test]
    fn test_thresholds_are_strict() {
        let synth = LabelSynthesizer::default();
        assert_eq!(synth.label(&record(Some(60.0), None, None, None)).label, 0);
        assert_eq!(synth.label(&record(None, None, None, Some(2))).label, 0);
        assert_eq!(synth.label(&record(None, None, None, Some(3))).label, 1);
    }

    #[test]
    fn test_missing_fields_skip_rules() {
        let synth = LabelSynthesizer::default();
        // Only the incident rule can run
        let outcome = synth.label(&record(None, Some(50.0), None, Some(1)));
        assert_eq!(outcome.label, 0);
        assert_eq!(outcome.rules_evaluated, 1);
        assert_eq!(outcome.confidence, LabelConfidence::Normal);
    }

    #[test]
    fn test_all_fields_missing_is_low_confidence_zero() {
        let outcome = LabelSynthesizer::default().label(&record(None, None, None, None));
        assert_eq!(outcome.label, 0);
        assert_eq!(outcome.rules_evaluated, 0);
        assert_eq!(outcome.fired_rule, None);
        assert_eq!(outcome.confidence, LabelConfidence::Low);
    }

    #[test]
    fn test_custom_thresholds() {
        let rules = RuleSet {
            rules: vec![LabelRule::new(
                "strict_score",
                vec![RuleCondition::below(NumericField::FinalScore, 85.0)],
            )],
        };
        let synth = LabelSynthesizer::new(rules);
        assert_eq!(synth.label(&record(Some(80.0), None, None, None)).label, 1);
        assert_eq!(LabelSynthesizer::default().label(&record(Some(80.0), None, None, None)).label, 0);
    }

    #[test]
    fn test_field_thresholds_take_loosest() {
        let thresholds = RuleSet::default().field_thresholds();
        let fields: Vec<(NumericField, f64)> =
            thresholds.iter().map(|t| (t.field, t.threshold)).collect();
        assert_eq!(
            fields,
            vec![
                (NumericField::FinalScore, 70.0),
                (NumericField::AttendancePercentage, 90.0),
                (NumericField::LmsLoginsPerWeek, 3.0),
                (NumericField::DisciplinaryIncidents, 2.0),
            ]
        );
    }

    #[test]
    fn test_synthesize_counts_low_confidence() {
        let records = vec![
            record(Some(50.0), None, None, None),
            record(None, None, None, None),
            record(Some(90.0), Some(95.0), Some(6), Some(0)),
        ];
        let (examples, low) = LabelSynthesizer::default().synthesize(&records);
        let labels: Vec<u8> = examples.iter().map(|e| e.label).collect();
        assert_eq!(labels, vec![1, 0, 0]);
        assert_eq!(low, 1);
    }

    #[test]
    fn test_rule_set_round_trips_through_json() {
        let json = serde_json::to_string(&RuleSet::default()).unwrap();
        assert!(json.contains("\"less_than\""));
        let back: RuleSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RuleSet::default());
    }
}
