//! Core types for the cohort-risk pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: validated student-term records, labeled training examples,
//! feature vectors and risk scores.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Academic season, ordered within a calendar year
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    Spring,
    Summer,
    Fall,
}

impl Season {
    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Spring => "Spring",
            Season::Summer => "Summer",
            Season::Fall => "Fall",
        }
    }
}

/// Academic term, e.g. `Fall 2024`. Ordered by year, then season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Term {
    pub season: Season,
    pub year: u16,
}

impl Term {
    pub fn new(season: Season, year: u16) -> Self {
        Self { season, year }
    }
}

impl Ord for Term {
    fn cmp(&self, other: &Self) -> Ordering {
        self.year
            .cmp(&other.year)
            .then_with(|| self.season.cmp(&other.season))
    }
}

impl PartialOrd for Term {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.season.as_str(), self.year)
    }
}

impl FromStr for Term {
    type Err = String;

    /// Accepts `Fall2024`, `Fall 2024`, `fall-2024` and `Autumn_2024`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_lowercase();

        let split_at = compact
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| format!("term '{s}' has no year"))?;
        let (season, year) = compact.split_at(split_at);

        let season = match season {
            "spring" => Season::Spring,
            "summer" => Season::Summer,
            "fall" | "autumn" => Season::Fall,
            other => return Err(format!("unknown season '{other}' in term '{s}'")),
        };

        if year.len() != 4 {
            return Err(format!("term '{s}' must carry a four-digit year"));
        }
        let year = year
            .parse::<u16>()
            .map_err(|_| format!("invalid year in term '{s}'"))?;

        Ok(Term { season, year })
    }
}

impl TryFrom<String> for Term {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Term> for String {
    fn from(term: Term) -> Self {
        term.to_string()
    }
}

/// Numeric fields of a student-term record, in canonical feature order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericField {
    FinalScore,
    AttendancePercentage,
    LmsLoginsPerWeek,
    DisciplinaryIncidents,
}

impl NumericField {
    pub const ALL: [NumericField; 4] = [
        NumericField::FinalScore,
        NumericField::AttendancePercentage,
        NumericField::LmsLoginsPerWeek,
        NumericField::DisciplinaryIncidents,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NumericField::FinalScore => "final_score",
            NumericField::AttendancePercentage => "attendance_percentage",
            NumericField::LmsLoginsPerWeek => "lms_logins_per_week",
            NumericField::DisciplinaryIncidents => "disciplinary_incidents",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.as_str() == name)
    }

    /// Read this field from a record
    pub fn value(&self, record: &StudentTermRecord) -> Option<f64> {
        match self {
            NumericField::FinalScore => record.final_score,
            NumericField::AttendancePercentage => record.attendance_percentage,
            NumericField::LmsLoginsPerWeek => record.lms_logins_per_week.map(f64::from),
            NumericField::DisciplinaryIncidents => record.disciplinary_incidents.map(f64::from),
        }
    }
}

impl fmt::Display for NumericField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One student's validated state in one academic term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentTermRecord {
    pub student_id: String,
    pub term: Term,
    /// Final course score (0-100)
    pub final_score: Option<f64>,
    /// Attendance (0-100)
    pub attendance_percentage: Option<f64>,
    pub lms_logins_per_week: Option<u32>,
    pub disciplinary_incidents: Option<u32>,
    /// Highest parental education level, open vocabulary
    pub parental_education: Option<String>,
}

impl StudentTermRecord {
    /// A record with only its identifying fields set
    pub fn new(student_id: impl Into<String>, term: Term) -> Self {
        Self {
            student_id: student_id.into(),
            term,
            final_score: None,
            attendance_percentage: None,
            lms_logins_per_week: None,
            disciplinary_incidents: None,
            parental_education: None,
        }
    }
}

/// A record paired with its synthesized label (1 = at-risk)
#[derive(Debug, Clone)]
pub struct TrainingExample {
    pub record: StudentTermRecord,
    pub label: u8,
}

/// Fixed-order numeric features for one record
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub student_id: String,
    pub term: Term,
    /// Feature names defining the order of `values`
    pub names: Vec<String>,
    /// Raw (unscaled) values after imputation
    pub values: Vec<f64>,
    /// True where the value was filled from a training statistic
    pub imputed: Vec<bool>,
}

impl FeatureVector {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value of a named feature, if it was observed rather than imputed
    pub fn observed(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .filter(|&i| self.imputed.get(i) == Some(&false))
            .and_then(|i| self.values.get(i).copied())
    }
}

/// Non-fatal notice that a feature value was imputed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingValuePolicyWarning {
    pub student_id: String,
    pub term: Term,
    pub feature: String,
    pub imputed_value: f64,
}

/// Non-fatal notice that a raw value was out of range and dropped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowWarning {
    pub row: usize,
    pub student_id: String,
    pub field: String,
    pub message: String,
}

/// Discretized risk band
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "LOW",
            RiskTier::Medium => "MEDIUM",
            RiskTier::High => "HIGH",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw feature that breached its documented risk threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributingSignal {
    pub feature: String,
    pub value: f64,
    pub threshold: f64,
    /// Relative distance past the threshold
    pub breach: f64,
}

/// Scored risk for one student-term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub student_id: String,
    pub term: Term,
    pub probability: f64,
    pub tier: RiskTier,
    pub contributing_signals: Vec<ContributingSignal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_parsing_variants() {
        let expected = Term::new(Season::Fall, 2024);
        assert_eq!("Fall2024".parse::<Term>().unwrap(), expected);
        assert_eq!("Fall 2024".parse::<Term>().unwrap(), expected);
        assert_eq!("fall-2024".parse::<Term>().unwrap(), expected);
        assert_eq!("Autumn_2024".parse::<Term>().unwrap(), expected);
        assert!("Winter 2024".parse::<Term>().is_err());
        assert!("Fall 24".parse::<Term>().is_err());
        assert!("Spring".parse::<Term>().is_err());
    }

    #[test]
    fn test_term_ordering() {
        let fall24: Term = "Fall2024".parse().unwrap();
        let spring25: Term = "Spring2025".parse().unwrap();
        let fall25: Term = "Fall2025".parse().unwrap();
        assert!(fall24 < spring25);
        assert!(spring25 < fall25);
    }

    #[test]
    fn test_term_serde_as_string() {
        let term = Term::new(Season::Spring, 2025);
        let json = serde_json::to_string(&term).unwrap();
        assert_eq!(json, "\"Spring 2025\"");
        let back: Term = serde_json::from_str("\"Spring2025\"").unwrap();
        assert_eq!(back, term);
    }

    #[test]
    fn test_risk_tier_order_and_serde() {
        assert!(RiskTier::Low < RiskTier::Medium);
        assert!(RiskTier::Medium < RiskTier::High);
        assert_eq!(serde_json::to_string(&RiskTier::High).unwrap(), "\"HIGH\"");
    }

    #[test]
    fn test_numeric_field_lookup() {
        let mut record = StudentTermRecord::new("STU-1", Term::new(Season::Fall, 2024));
        record.lms_logins_per_week = Some(4);
        assert_eq!(
            NumericField::from_name("lms_logins_per_week"),
            Some(NumericField::LmsLoginsPerWeek)
        );
        assert_eq!(NumericField::LmsLoginsPerWeek.value(&record), Some(4.0));
        assert_eq!(NumericField::FinalScore.value(&record), None);
        assert_eq!(NumericField::from_name("gpa"), None);
    }

    #[test]
    fn test_feature_vector_observed_skips_imputed() {
        let vector = FeatureVector {
            student_id: "STU-1".to_string(),
            term: Term::new(Season::Fall, 2024),
            names: vec!["final_score".to_string(), "attendance_percentage".to_string()],
            values: vec![55.0, 91.0],
            imputed: vec![false, true],
        };
        assert_eq!(vector.observed("final_score"), Some(55.0));
        assert_eq!(vector.observed("attendance_percentage"), None);
        assert_eq!(vector.observed("gpa"), None);
    }

    #[test]
    fn test_feature_vector_observed_on_short_vector() {
        let vector = FeatureVector {
            student_id: "STU-1".to_string(),
            term: Term::new(Season::Fall, 2024),
            names: vec!["final_score".to_string(), "attendance_percentage".to_string()],
            values: vec![55.0],
            imputed: vec![false],
        };
        assert_eq!(vector.observed("final_score"), Some(55.0));
        assert_eq!(vector.observed("attendance_percentage"), None);
    }
}
