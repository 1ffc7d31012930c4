//! Run configuration
//!
//! A single [`RiskConfig`] is passed into every stage at construction. There
//! is no global state, so differently-configured pipelines can run side by
//! side. Every field has a default, and a JSON file only needs to name what it
//! overrides.

use crate::error::RiskError;
use crate::labels::RuleSet;
use crate::scorer::TierCutPoints;
use crate::trainer::TrainerConfig;
use crate::types::Term;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable naming a config file for the CLI
pub const CONFIG_ENV_VAR: &str = "RISKCTL_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Labeling rules, also used to explain scores
    pub rules: RuleSet,
    /// Frozen feature list for training; empty derives it from the records
    pub features: Vec<String>,
    pub trainer: TrainerConfig,
    pub tiers: TierCutPoints,
    /// Only records from this term become training examples
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_term: Option<Term>,
}

impl RiskConfig {
    /// Parse and validate a JSON config
    pub fn from_json(json: &str) -> Result<Self, RiskError> {
        let config: RiskConfig = serde_json::from_str(json)
            .map_err(|e| RiskError::InvalidConfig(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, RiskError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, RiskError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), RiskError> {
        self.rules.validate().map_err(|e| section("rules", e))?;
        self.trainer.validate().map_err(|e| section("trainer", e))?;
        self.tiers.validate().map_err(|e| section("tiers", e))?;
        Ok(())
    }
}

fn section(name: &str, reason: String) -> RiskError {
    RiskError::InvalidConfig(format!("{name}: {reason}"))
}
