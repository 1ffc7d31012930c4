//! cohort-risk - Deterministic at-risk scoring for per-term student records
//!
//! cohort-risk turns merged student-term records into a ranked list of
//! students to prioritize for outreach through a deterministic pipeline:
//! schema validation → rule-based label synthesis → feature construction →
//! logistic regression training → scoring → ranking.
//!
//! ## Modules
//!
//! - **Training**: [`labels`], [`features`], [`trainer`] produce a [`TrainedModel`]
//! - **Inference**: [`scorer`] and [`ranking`] apply a loaded artifact to a batch
//! - **Orchestration**: [`pipeline`] runs either path end to end from raw rows

pub mod config;
pub mod error;
pub mod features;
pub mod labels;
pub mod metrics;
pub mod model;
pub mod normalizer;
pub mod pipeline;
pub mod ranking;
pub mod schema;
pub mod scorer;
pub mod trainer;
pub mod types;

pub use config::RiskConfig;
pub use error::{RiskError, SchemaError};
pub use features::{FeatureBuilder, FeatureSchema};
pub use labels::{LabelSynthesizer, RuleSet};
pub use model::TrainedModel;
pub use pipeline::{score_records, train_from_records, RiskPipeline, RunSummary};
pub use ranking::RankingReporter;
pub use schema::{RawStudentRecord, RecordAdapter};
pub use scorer::{RiskScorer, TierCutPoints};
pub use trainer::{ModelTrainer, TrainerConfig};
pub use types::{RiskScore, RiskTier, StudentTermRecord, Term};

/// Crate version, reported by the CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
