//! Ranked batch reports

use crate::types::{RiskScore, RiskTier};
use serde::Serialize;

/// Counts of scores per tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

/// Orders scored students for outreach
pub struct RankingReporter;

impl RankingReporter {
    /// Probability descending, then `student_id` ascending, then term ascending.
    ///
    /// The order is total, so equal inputs always rank identically.
    pub fn rank(mut scores: Vec<RiskScore>) -> Vec<RiskScore> {
        scores.sort_by(|a, b| {
            b.probability
                .total_cmp(&a.probability)
                .then_with(|| a.student_id.cmp(&b.student_id))
                .then_with(|| a.term.cmp(&b.term))
        });
        scores
    }

    /// The first `n` entries of a ranked batch
    pub fn top(ranked: &[RiskScore], n: usize) -> &[RiskScore] {
        &ranked[..n.min(ranked.len())]
    }

    pub fn tier_counts(scores: &[RiskScore]) -> TierCounts {
        scores.iter().fold(TierCounts::default(), |mut counts, s| {
            match s.tier {
                RiskTier::High => counts.high += 1,
                RiskTier::Medium => counts.medium += 1,
                RiskTier::Low => counts.low += 1,
            }
            counts
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Season, Term};
    use pretty_assertions::assert_eq;

    fn score(id: &str, term: Term, probability: f64, tier: RiskTier) -> RiskScore {
        RiskScore {
            student_id: id.to_string(),
            term,
            probability,
            tier,
            contributing_signals: vec![],
        }
    }

    fn ids(scores: &[RiskScore]) -> Vec<&str> {
        scores.iter().map(|s| s.student_id.as_str()).collect()
    }

    #[test]
    fn test_ties_break_on_student_id() {
        let term = Term::new(Season::Spring, 2025);
        let ranked = RankingReporter::rank(vec![
            score("S2", term, 0.9, RiskTier::High),
            score("S3", term, 0.2, RiskTier::Medium),
            score("S1", term, 0.9, RiskTier::High),
        ]);
        assert_eq!(ids(&ranked), vec!["S1", "S2", "S3"]);
    }

    #[test]
    fn test_same_student_breaks_on_term() {
        let fall = Term::new(Season::Fall, 2024);
        let spring = Term::new(Season::Spring, 2025);
        let ranked = RankingReporter::rank(vec![
            score("S1", spring, 0.5, RiskTier::Medium),
            score("S1", fall, 0.5, RiskTier::Medium),
        ]);
        assert_eq!(ranked[0].term, fall);
        assert_eq!(ranked[1].term, spring);
    }

    #[test]
    fn test_top_truncates() {
        let term = Term::new(Season::Spring, 2025);
        let ranked = RankingReporter::rank(vec![
            score("S1", term, 0.3, RiskTier::Medium),
            score("S2", term, 0.6, RiskTier::Medium),
        ]);
        assert_eq!(ids(RankingReporter::top(&ranked, 1)), vec!["S2"]);
        assert_eq!(RankingReporter::top(&ranked, 10).len(), 2);
    }

    #[test]
    fn test_tier_counts() {
        let term = Term::new(Season::Spring, 2025);
        let counts = RankingReporter::tier_counts(&[
            score("S1", term, 0.95, RiskTier::High),
            score("S2", term, 0.5, RiskTier::Medium),
            score("S3", term, 0.05, RiskTier::Low),
            score("S4", term, 0.01, RiskTier::Low),
        ]);
        assert_eq!(
            counts,
            TierCounts {
                high: 1,
                medium: 1,
                low: 2
            }
        );
    }
}
