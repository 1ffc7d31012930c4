//! Pipeline orchestration
//!
//! This module provides the public API for cohort-risk. It runs raw rows
//! through every stage, from schema validation to a ranked report.
//!
//! Training: validate → label → derive features → train.
//! Scoring: validate → build features against the artifact → score → rank.

use crate::config::RiskConfig;
use crate::error::RiskError;
use crate::features::{FeatureBuilder, ImputationSummary};
use crate::labels::LabelSynthesizer;
use crate::model::{ClassCounts, TrainedModel};
use crate::ranking::{RankingReporter, TierCounts};
use crate::schema::{RawStudentRecord, RecordAdapter, ValidatedBatch, ValidationErrorDetail};
use crate::scorer::RiskScorer;
use crate::trainer::ModelTrainer;
use crate::types::{RiskScore, RowWarning, StudentTermRecord, Term};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

/// What happened to the input of one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub rows_read: usize,
    pub valid_rows: usize,
    pub dropped_rows: usize,
    /// Why each dropped row was dropped
    pub dropped: Vec<ValidationErrorDetail>,
    /// Out-of-range values nulled during validation
    pub row_warnings: Vec<RowWarning>,
    /// Records that reached feature construction
    pub records_used: usize,
    pub imputations: ImputationSummary,
    /// Synthesized label counts (training runs only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<ClassCounts>,
    pub low_confidence_labels: usize,
    /// Tier counts (scoring runs only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiers: Option<TierCounts>,
}

impl RunSummary {
    fn from_batch(batch: &ValidatedBatch) -> Self {
        let report = batch.report();
        Self {
            rows_read: report.rows_read,
            valid_rows: report.valid_rows,
            dropped_rows: report.dropped_rows,
            dropped: report.errors,
            row_warnings: report.warnings,
            ..Default::default()
        }
    }
}

/// A trained model and the summary of the run that produced it
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub model: TrainedModel,
    pub summary: RunSummary,
}

/// Ranked scores and the summary of the run that produced them
#[derive(Debug, Clone, Serialize)]
pub struct ScoringReport {
    pub ranked: Vec<RiskScore>,
    pub summary: RunSummary,
}

/// Train a model from raw rows.
///
/// # Example
/// ```ignore
/// let rows = RecordAdapter::parse_ndjson(&input)?;
/// let report = train_from_records(&rows, &RiskConfig::default())?;
/// report.model.save(Path::new("model.json"))?;
/// ```
pub fn train_from_records(
    rows: &[RawStudentRecord],
    config: &RiskConfig,
) -> Result<TrainingReport, RiskError> {
    train_batch(RecordAdapter::validate_batch(rows), config)
}

/// Train a model from an already-validated batch
pub fn train_batch(batch: ValidatedBatch, config: &RiskConfig) -> Result<TrainingReport, RiskError> {
    config.validate()?;
    let mut summary = RunSummary::from_batch(&batch);

    let records: Vec<StudentTermRecord> = match config.label_term {
        Some(term) => batch.records.into_iter().filter(|r| r.term == term).collect(),
        None => batch.records,
    };
    summary.records_used = records.len();

    let (examples, low_confidence_labels) =
        LabelSynthesizer::new(config.rules.clone()).synthesize(&records);
    let labels: Vec<u8> = examples.iter().map(|e| e.label).collect();
    summary.low_confidence_labels = low_confidence_labels;

    let trainer = ModelTrainer::new(config.trainer.clone(), config.rules.clone())?;
    let at_risk = trainer.check_labels(&labels)?;
    summary.labels = Some(ClassCounts {
        not_at_risk: labels.len() - at_risk,
        at_risk,
    });

    let schema = FeatureBuilder::derive(&records, &config.features)?;
    let (vectors, imputations) = schema.build_batch(&records);
    summary.imputations = imputations;

    let model = trainer.train(&schema, &vectors, &labels, low_confidence_labels)?;

    tracing::info!(
        model_id = %model.model_id,
        examples = model.training_examples,
        features = model.feature_names.len(),
        imputations = summary.imputations.total,
        "training run complete"
    );

    Ok(TrainingReport { model, summary })
}

/// Score raw rows against a trained model, ranked for outreach
pub fn score_records(
    model: &TrainedModel,
    rows: &[RawStudentRecord],
    config: &RiskConfig,
) -> Result<ScoringReport, RiskError> {
    score_batch(model, RecordAdapter::validate_batch(rows), config)
}

/// Score an already-validated batch
pub fn score_batch(
    model: &TrainedModel,
    batch: ValidatedBatch,
    config: &RiskConfig,
) -> Result<ScoringReport, RiskError> {
    config.validate()?;
    let mut summary = RunSummary::from_batch(&batch);

    if model.low_confidence {
        tracing::warn!(
            model_id = %model.model_id,
            flags = ?model.confidence_flags,
            "scoring with a low-confidence model"
        );
    }

    let schema = model.feature_schema()?;
    let (vectors, imputations) = schema.build_batch(&batch.records);
    summary.records_used = vectors.len();
    summary.imputations = imputations;

    let scorer = RiskScorer::new(model, &config.rules, config.tiers);
    let ranked = RankingReporter::rank(scorer.score_all(&vectors)?);
    summary.tiers = Some(RankingReporter::tier_counts(&ranked));

    tracing::info!(scored = ranked.len(), "scoring run complete");
    Ok(ScoringReport { ranked, summary })
}

/// Keep only each student's most recent term, in input order
pub fn latest_term_records(records: Vec<StudentTermRecord>) -> Vec<StudentTermRecord> {
    let mut latest: HashMap<String, Term> = HashMap::new();
    for record in &records {
        latest
            .entry(record.student_id.clone())
            .and_modify(|term| *term = (*term).max(record.term))
            .or_insert(record.term);
    }
    records
        .into_iter()
        .filter(|r| latest.get(&r.student_id) == Some(&r.term))
        .collect()
}

/// Stateful pipeline holding a configuration and the current model.
///
/// Use this when training and scoring happen in one process, or when one
/// loaded artifact scores several batches.
#[derive(Debug, Clone, Default)]
pub struct RiskPipeline {
    config: RiskConfig,
    model: Option<TrainedModel>,
}

impl RiskPipeline {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            model: None,
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn model(&self) -> Option<&TrainedModel> {
        self.model.as_ref()
    }

    /// Train and keep a new model, replacing any previous one
    pub fn train(&mut self, rows: &[RawStudentRecord]) -> Result<RunSummary, RiskError> {
        let report = train_from_records(rows, &self.config)?;
        self.model = Some(report.model);
        Ok(report.summary)
    }

    /// Load model state from JSON
    pub fn load_model(&mut self, json: &str) -> Result<(), RiskError> {
        self.model = Some(TrainedModel::from_json(json)?);
        Ok(())
    }

    /// Save model state to JSON
    pub fn save_model(&self) -> Result<String, RiskError> {
        self.current()?.to_json()
    }

    pub fn load_model_file(&mut self, path: &Path) -> Result<(), RiskError> {
        self.model = Some(TrainedModel::load(path)?);
        Ok(())
    }

    pub fn save_model_file(&self, path: &Path) -> Result<(), RiskError> {
        self.current()?.save(path)
    }

    pub fn score(&self, rows: &[RawStudentRecord]) -> Result<ScoringReport, RiskError> {
        score_records(self.current()?, rows, &self.config)
    }

    fn current(&self) -> Result<&TrainedModel, RiskError> {
        self.model.as_ref().ok_or(RiskError::NoModel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RiskTier, Season};

    fn row(id: &str, term: &str, score: f64, attendance: f64, lms: f64, incidents: f64) -> RawStudentRecord {
        RawStudentRecord {
            student_id: Some(id.to_string()),
            term: Some(term.to_string()),
            final_score: Some(score),
            attendance_percentage: Some(attendance),
            lms_logins_per_week: Some(lms),
            disciplinary_incidents: Some(incidents),
            parental_education: None,
        }
    }

    fn cohort() -> Vec<RawStudentRecord> {
        vec![
            row("STU-01", "Spring 2025", 52.0, 80.0, 1.0, 3.0),
            row("STU-02", "Spring 2025", 91.0, 98.0, 9.0, 0.0),
            row("STU-03", "Spring 2025", 66.0, 86.0, 3.0, 1.0),
            row("STU-04", "Spring 2025", 88.0, 95.0, 7.0, 0.0),
            row("STU-05", "Spring 2025", 74.0, 82.0, 2.0, 0.0),
            row("STU-06", "Spring 2025", 95.0, 99.0, 10.0, 0.0),
            row("STU-07", "Fall 2024", 58.0, 92.0, 4.0, 0.0),
            row("STU-07", "Spring 2025", 61.0, 93.0, 4.0, 0.0),
            row("STU-08", "Spring 2025", 83.0, 93.0, 6.0, 1.0),
        ]
    }

    #[test]
    fn test_train_then_score() {
        let config = RiskConfig::default();
        let report = train_from_records(&cohort(), &config).unwrap();

        assert_eq!(report.summary.rows_read, 9);
        assert_eq!(report.summary.records_used, 9);
        assert_eq!(
            report.summary.labels,
            Some(ClassCounts {
                not_at_risk: 5,
                at_risk: 4
            })
        );

        let scored = score_records(&report.model, &cohort(), &config).unwrap();
        assert_eq!(scored.ranked.len(), 9);
        for pair in scored.ranked.windows(2) {
            assert!(pair[0].probability >= pair[1].probability);
        }
        let tiers = scored.summary.tiers.unwrap();
        assert_eq!(tiers.high + tiers.medium + tiers.low, 9);
    }

    #[test]
    fn test_label_term_filters_examples() {
        let config = RiskConfig {
            label_term: Some(Term::new(Season::Fall, 2024)),
            ..Default::default()
        };
        // Only one Fall 2024 record remains
        let err = train_from_records(&cohort(), &config).unwrap_err();
        assert!(matches!(
            err,
            RiskError::InsufficientData {
                available: 1,
                required: 2
            }
        ));
    }

    #[test]
    fn test_degenerate_cohort_fails_before_features() {
        let rows = vec![
            row("STU-1", "Spring 2025", 90.0, 99.0, 8.0, 0.0),
            row("STU-2", "Spring 2025", 92.0, 97.0, 6.0, 0.0),
        ];
        assert!(matches!(
            train_from_records(&rows, &RiskConfig::default()),
            Err(RiskError::DegenerateLabels { label: 0, count: 2 })
        ));
    }

    #[test]
    fn test_dropped_rows_are_counted() {
        let mut rows = cohort();
        rows.push(RawStudentRecord {
            student_id: None,
            ..row("", "Spring 2025", 50.0, 50.0, 0.0, 0.0)
        });
        rows.push(row("STU-02", "Spring 2025", 10.0, 10.0, 0.0, 9.0));

        let report = train_from_records(&rows, &RiskConfig::default()).unwrap();
        assert_eq!(report.summary.rows_read, 11);
        assert_eq!(report.summary.dropped_rows, 2);
        assert_eq!(report.summary.dropped[0].row, 9);
        assert_eq!(report.summary.dropped[1].row, 10);
    }

    #[test]
    fn test_latest_term_records() {
        let batch = RecordAdapter::validate_batch(&cohort());
        let latest = latest_term_records(batch.records);

        assert_eq!(latest.len(), 8);
        let stu7: Vec<Term> = latest
            .iter()
            .filter(|r| r.student_id == "STU-07")
            .map(|r| r.term)
            .collect();
        assert_eq!(stu7, vec![Term::new(Season::Spring, 2025)]);
    }

    #[test]
    fn test_stateful_pipeline() {
        let mut pipeline = RiskPipeline::new(RiskConfig::default());
        assert!(matches!(pipeline.score(&cohort()), Err(RiskError::NoModel)));

        pipeline.train(&cohort()).unwrap();
        let json = pipeline.save_model().unwrap();
        let first = pipeline.score(&cohort()).unwrap();

        let mut restored = RiskPipeline::default();
        restored.load_model(&json).unwrap();
        let second = restored.score(&cohort()).unwrap();

        let probs = |r: &ScoringReport| r.ranked.iter().map(|s| s.probability).collect::<Vec<_>>();
        assert_eq!(probs(&first), probs(&second));
    }

    #[test]
    fn test_high_risk_student_ranks_first() {
        let config = RiskConfig::default();
        let report = train_from_records(&cohort(), &config).unwrap();
        let scored = score_records(&report.model, &cohort(), &config).unwrap();

        let top = &scored.ranked[0];
        assert_eq!(top.student_id, "STU-01");
        assert_ne!(top.tier, RiskTier::Low);
    }
}
