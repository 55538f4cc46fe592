//! Weighted combination of criterion scores into match results.

use crate::config::MatchingConfig;
use crate::models::{
    ConfidenceLevel, CriteriaScores, Criterion, Invoice, LedgerTransaction, MatchResult,
};
use std::cmp::Ordering;

/// Band a final score into a confidence level and auto-apply eligibility.
/// Used both when a match is first produced and when a semantic verdict
/// moves its score.
pub fn classify(score: f64, config: &MatchingConfig) -> (ConfidenceLevel, bool) {
    if score >= config.high_threshold {
        (ConfidenceLevel::High, true)
    } else if score >= config.medium_threshold {
        (ConfidenceLevel::Medium, false)
    } else {
        (ConfidenceLevel::Low, false)
    }
}

/// Turns per-criterion scores into ranked [`MatchResult`]s.
#[derive(Debug, Clone)]
pub struct MatchEvaluator {
    config: MatchingConfig,
}

impl MatchEvaluator {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    /// Combine criterion scores for one pair. Returns `None` when the final
    /// score falls below the review floor; those pairs are dropped, not
    /// persisted as low confidence.
    pub fn finalize(
        &self,
        invoice: &Invoice,
        transaction: &LedgerTransaction,
        scores: CriteriaScores,
    ) -> Option<MatchResult> {
        let score = self
            .config
            .weights
            .weighted_sum(&scores)
            .clamp(0.0, 1.0);

        if score < self.config.medium_threshold {
            return None;
        }

        let (confidence, auto_match) = classify(score, &self.config);
        let dominant = dominant_criterion(&scores);

        Some(MatchResult {
            invoice_id: invoice.id.clone(),
            transaction_id: transaction.transaction_id.clone(),
            score,
            match_type: dominant.as_str().to_string(),
            criteria_scores: scores,
            confidence,
            auto_match,
            explanation: explanation(confidence, &scores),
        })
    }

    /// Order one invoice's matches by score descending and keep the best
    /// few. Ties keep candidate retrieval order, which is itself fixed, so
    /// the survivors are stable across runs.
    pub fn rank(&self, mut results: Vec<MatchResult>) -> Vec<MatchResult> {
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        results.truncate(self.config.max_matches_per_invoice);
        results
    }
}

/// Criterion with the highest score; ties resolve in the fixed criterion
/// order.
fn dominant_criterion(scores: &CriteriaScores) -> Criterion {
    let mut best = Criterion::Amount;
    for criterion in Criterion::ALL {
        if scores.get(criterion) > scores.get(best) {
            best = criterion;
        }
    }
    best
}

/// Short human-readable summary of which criteria carried the match. Each
/// criterion has its own mention threshold since their banding differs.
fn explanation(confidence: ConfidenceLevel, scores: &CriteriaScores) -> String {
    let banner = match confidence {
        ConfidenceLevel::High => "High confidence match",
        ConfidenceLevel::Medium => "Possible match",
        ConfidenceLevel::Low => "Weak match",
    };

    let mut reasons = Vec::new();
    if scores.amount >= 0.6 {
        reasons.push(format!("amount within tolerance ({:.2})", scores.amount));
    }
    if scores.date >= 0.7 {
        reasons.push(format!("dates aligned ({:.2})", scores.date));
    }
    if scores.vendor >= 0.4 {
        reasons.push(format!("vendor resembles description ({:.2})", scores.vendor));
    }
    if scores.entity >= 0.8 {
        reasons.push(format!("entity corroborated ({:.2})", scores.entity));
    }
    if scores.pattern >= 0.8 {
        reasons.push(format!("invoice number referenced ({:.2})", scores.pattern));
    }

    if reasons.is_empty() {
        banner.to_string()
    } else {
        format!("{}: {}", banner, reasons.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn invoice() -> Invoice {
        Invoice {
            id: "inv-1".to_string(),
            invoice_number: "INV-1001".to_string(),
            vendor_name: "Acme Corp".to_string(),
            total_amount: Decimal::new(100000, 2),
            currency: "USD".to_string(),
            issue_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            due_date: None,
            business_unit: "Acme Corp".to_string(),
            status: "sent".to_string(),
            linked_transaction_id: None,
        }
    }

    fn transaction(id: &str) -> LedgerTransaction {
        LedgerTransaction {
            transaction_id: id.to_string(),
            date: "2024-03-01".to_string(),
            description: "ACME CORP".to_string(),
            amount: Decimal::new(-100000, 2),
            currency: "USD".to_string(),
            classified_entity: None,
        }
    }

    fn scores(amount: f64, date: f64, vendor: f64, entity: f64, pattern: f64) -> CriteriaScores {
        CriteriaScores {
            amount,
            date,
            vendor,
            entity,
            pattern,
        }
    }

    #[test]
    fn classify_respects_both_thresholds() {
        let config = MatchingConfig::default();
        assert_eq!(classify(0.95, &config), (ConfidenceLevel::High, true));
        assert_eq!(classify(0.90, &config), (ConfidenceLevel::High, true));
        assert_eq!(classify(0.89, &config), (ConfidenceLevel::Medium, false));
        assert_eq!(classify(0.50, &config), (ConfidenceLevel::Medium, false));
        assert_eq!(classify(0.49, &config), (ConfidenceLevel::Low, false));
    }

    #[test]
    fn finalize_drops_pairs_below_review_floor() {
        let evaluator = MatchEvaluator::new(MatchingConfig::default());
        let result = evaluator.finalize(
            &invoice(),
            &transaction("txn-1"),
            scores(0.3, 0.5, 0.0, 0.5, 0.0),
        );
        assert!(result.is_none());
    }

    #[test]
    fn lowered_review_floor_retains_the_same_pair() {
        let mut config = MatchingConfig::default();
        config.medium_threshold = 0.07;
        let evaluator = MatchEvaluator::new(config);
        let result = evaluator
            .finalize(
                &invoice(),
                &transaction("txn-1"),
                scores(0.3, 0.5, 0.0, 0.5, 0.0),
            )
            .unwrap();
        assert_eq!(result.confidence, ConfidenceLevel::Medium);
        assert!(!result.auto_match);
    }

    #[test]
    fn perfect_scores_produce_a_high_confidence_auto_match() {
        let evaluator = MatchEvaluator::new(MatchingConfig::default());
        let result = evaluator
            .finalize(
                &invoice(),
                &transaction("txn-1"),
                scores(1.0, 1.0, 1.0, 1.0, 1.0),
            )
            .unwrap();
        assert!((result.score - 1.0).abs() < 1e-12);
        assert_eq!(result.confidence, ConfidenceLevel::High);
        assert!(result.auto_match);
    }

    #[test]
    fn final_score_never_exceeds_best_criterion() {
        // With weights summing to 1.0 the weighted sum is a convex
        // combination, so it is bounded by the largest component.
        let evaluator = MatchEvaluator::new(MatchingConfig::default());
        let input = scores(0.95, 0.9, 1.0, 0.5, 0.8);
        let best = [0.95, 0.9, 1.0, 0.5, 0.8]
            .into_iter()
            .fold(f64::MIN, f64::max);
        let result = evaluator
            .finalize(&invoice(), &transaction("txn-1"), input)
            .unwrap();
        assert!(result.score <= best + 1e-12);
    }

    #[test]
    fn dominant_criterion_breaks_ties_in_fixed_order() {
        assert_eq!(
            dominant_criterion(&scores(0.9, 0.9, 0.9, 0.9, 0.9)),
            Criterion::Amount
        );
        assert_eq!(
            dominant_criterion(&scores(0.2, 0.9, 0.9, 0.1, 0.1)),
            Criterion::Date
        );
        assert_eq!(
            dominant_criterion(&scores(0.1, 0.2, 0.3, 0.4, 0.9)),
            Criterion::Pattern
        );
    }

    #[test]
    fn match_type_names_the_dominant_criterion() {
        let evaluator = MatchEvaluator::new(MatchingConfig::default());
        let result = evaluator
            .finalize(
                &invoice(),
                &transaction("txn-1"),
                scores(0.6, 0.8, 1.0, 0.5, 0.0),
            )
            .unwrap();
        assert_eq!(result.match_type, "vendor");
    }

    #[test]
    fn rank_keeps_the_best_and_caps_the_count() {
        let mut config = MatchingConfig::default();
        config.max_matches_per_invoice = 2;
        let evaluator = MatchEvaluator::new(config);

        let mut results = Vec::new();
        for (id, amount) in [("txn-a", 0.6), ("txn-b", 1.0), ("txn-c", 0.8)] {
            results.push(
                evaluator
                    .finalize(
                        &invoice(),
                        &transaction(id),
                        scores(amount, 0.8, 1.0, 0.5, 0.0),
                    )
                    .unwrap(),
            );
        }

        let ranked = evaluator.rank(results);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].transaction_id, "txn-b");
        assert_eq!(ranked[1].transaction_id, "txn-c");
        assert!(ranked[0].score >= ranked[1].score);
    }

    #[test]
    fn explanation_mentions_contributing_criteria() {
        let evaluator = MatchEvaluator::new(MatchingConfig::default());
        let result = evaluator
            .finalize(
                &invoice(),
                &transaction("txn-1"),
                scores(1.0, 0.9, 1.0, 0.5, 0.8),
            )
            .unwrap();
        assert!(result.explanation.starts_with("High confidence match"));
        assert!(result.explanation.contains("amount within tolerance"));
        assert!(result.explanation.contains("dates aligned"));
        assert!(result.explanation.contains("invoice number referenced"));
        assert!(!result.explanation.contains("entity corroborated"));
    }
}
