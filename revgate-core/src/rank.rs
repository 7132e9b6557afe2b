//! Confidence filtering, priority ordering and batch scoring.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::types::{AnalysisSummary, Severity, Suggestion};

const CRITICAL_PENALTY: f64 = 20.0;
const WARNING_PENALTY: f64 = 5.0;
const INFO_PENALTY: f64 = 1.0;

/// Keeps suggestions whose confidence is at least `min_confidence`.
pub fn filter_by_confidence(suggestions: Vec<Suggestion>, min_confidence: f64) -> Vec<Suggestion> {
    suggestions.into_iter().filter(|s| s.confidence >= min_confidence).collect()
}

/// Priority order: more severe first, then more confident first.
pub fn priority(a: &Suggestion, b: &Suggestion) -> Ordering {
    a.severity
        .cmp(&b.severity)
        .then_with(|| b.confidence.total_cmp(&a.confidence))
}

/// Sorts in place by [`priority`]. Stable, so equal keys keep input order.
pub fn rank(suggestions: &mut [Suggestion]) {
    suggestions.sort_by(priority);
}

/// `clamp(100 - 20*critical - 5*warning - 1*info, 0, 100)`. Hints are free.
pub fn overall_score(critical: usize, warning: usize, info: usize) -> f64 {
    let penalty = CRITICAL_PENALTY * critical as f64
        + WARNING_PENALTY * warning as f64
        + INFO_PENALTY * info as f64;
    (100.0 - penalty).clamp(0.0, 100.0)
}

pub fn summarize(total_files: usize, suggestions: &[Suggestion]) -> AnalysisSummary {
    let mut summary = AnalysisSummary {
        total_files,
        total_suggestions: suggestions.len(),
        category_breakdown: BTreeMap::new(),
        ..AnalysisSummary::default()
    };
    for s in suggestions {
        match s.severity {
            Severity::Critical => summary.critical_count += 1,
            Severity::Warning => summary.warning_count += 1,
            Severity::Info => summary.info_count += 1,
            Severity::Hint => summary.hint_count += 1,
        }
        *summary.category_breakdown.entry(s.category).or_insert(0) += 1;
    }
    summary.overall_score =
        overall_score(summary.critical_count, summary.warning_count, summary.info_count);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;

    fn sugg(severity: Severity, confidence: f64) -> Suggestion {
        let mut s = Suggestion::pending("a.java", severity, Category::BugRisk);
        s.confidence = confidence;
        s
    }

    fn keys(batch: &[Suggestion]) -> Vec<(Severity, f64)> {
        batch.iter().map(|s| (s.severity, s.confidence)).collect()
    }

    #[test]
    fn threshold_is_inclusive() {
        let batch = || vec![sugg(Severity::Info, 0.79)];
        assert!(filter_by_confidence(batch(), 0.8).is_empty());
        assert_eq!(filter_by_confidence(batch(), 0.79).len(), 1);
        assert_eq!(filter_by_confidence(batch(), 0.5).len(), 1);
    }

    #[test]
    fn severity_first_then_confidence() {
        let mut batch = vec![
            sugg(Severity::Warning, 0.6),
            sugg(Severity::Critical, 0.9),
            sugg(Severity::Critical, 0.95),
            sugg(Severity::Info, 0.99),
        ];
        rank(&mut batch);
        assert_eq!(
            keys(&batch),
            vec![
                (Severity::Critical, 0.95),
                (Severity::Critical, 0.9),
                (Severity::Warning, 0.6),
                (Severity::Info, 0.99),
            ]
        );
    }

    #[test]
    fn ties_keep_input_order() {
        let mut first = sugg(Severity::Hint, 0.7);
        first.explanation = "first".into();
        let mut second = sugg(Severity::Hint, 0.7);
        second.explanation = "second".into();
        let mut batch = vec![first, second];
        rank(&mut batch);
        assert_eq!(batch[0].explanation, "first");
    }

    #[test]
    fn one_of_each_scores_74() {
        let batch = vec![
            sugg(Severity::Critical, 0.9),
            sugg(Severity::Warning, 0.9),
            sugg(Severity::Info, 0.9),
            sugg(Severity::Hint, 0.9),
        ];
        let summary = summarize(1, &batch);
        assert_eq!(summary.overall_score, 74.0);
        assert_eq!(
            (summary.critical_count, summary.warning_count, summary.info_count, summary.hint_count),
            (1, 1, 1, 1)
        );
        assert_eq!(summary.total_suggestions, 4);
        assert_eq!(summary.category_breakdown.get(&Category::BugRisk), Some(&4));
    }

    #[test]
    fn score_is_clamped() {
        assert_eq!(overall_score(6, 0, 0), 0.0);
        assert_eq!(overall_score(0, 0, 0), 100.0);
        assert_eq!(overall_score(0, 3, 7), 78.0);
    }

    #[test]
    fn empty_batch_is_perfect() {
        let summary = summarize(3, &[]);
        assert_eq!(summary.total_files, 3);
        assert_eq!(summary.overall_score, 100.0);
        assert!(summary.category_breakdown.is_empty());
    }
}
