//! Semantic review of uncertain matches.
//!
//! Matches whose final score lands in the uncertainty window are sent, in
//! small batches, to a [`SemanticJudge`] for a second opinion. The judge is
//! advisory: a confident confirmation can lift a match into auto-apply
//! range (capped at 0.95) and a confident rejection demotes it, but a
//! failed call or a low-confidence verdict leaves the deterministic result
//! exactly as it was.

pub mod claude;

use crate::config::MatchingConfig;
use crate::matching::evaluator;
use crate::models::{CriteriaScores, Invoice, LedgerTransaction, MatchResult};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;

/// Score ceiling after an AI confirmation. A confirmed match never reaches
/// a perfect score on the judge's word alone.
pub const AI_CONFIRMED_CEILING: f64 = 0.95;

/// Floor applied when the judge rejects a match.
pub const AI_REJECTED_FLOOR: f64 = 0.3;

/// Multiplier applied to a rejected match's score before flooring.
pub const AI_REJECTED_MULTIPLIER: f64 = 0.7;

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("Judge not configured: {0}")]
    NotConfigured(String),
    #[error("Judge API error: {0}")]
    Api(String),
    #[error("Judge network error: {0}")]
    Network(String),
    #[error("Judge returned malformed output: {0}")]
    Malformed(String),
}

/// Everything the judge sees about one uncertain match.
#[derive(Debug, Clone)]
pub struct ReviewCandidate {
    pub invoice_number: String,
    pub vendor_name: String,
    pub invoice_amount: Decimal,
    pub invoice_date: String,
    pub transaction_description: String,
    pub transaction_amount: Decimal,
    pub transaction_date: String,
    pub current_score: f64,
    pub criteria_scores: CriteriaScores,
}

impl ReviewCandidate {
    pub fn new(invoice: &Invoice, transaction: &LedgerTransaction, result: &MatchResult) -> Self {
        Self {
            invoice_number: invoice.invoice_number.clone(),
            vendor_name: invoice.vendor_name.clone(),
            invoice_amount: invoice.total_amount,
            invoice_date: invoice.target_date().format("%Y-%m-%d").to_string(),
            transaction_description: transaction.description.clone(),
            transaction_amount: transaction.amount,
            transaction_date: transaction.date.clone(),
            current_score: result.score,
            criteria_scores: result.criteria_scores,
        }
    }
}

/// One judge opinion about one candidate.
#[derive(Debug, Clone, Deserialize)]
pub struct Verdict {
    pub is_match: bool,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    pub adjusted_score: f64,
}

/// What applying a verdict did to the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictOutcome {
    Confirmed,
    Rejected,
    Inconclusive,
}

/// Reviews batches of uncertain matches. `None` entries in the response
/// mean the judge had no usable opinion on that candidate.
#[async_trait]
pub trait SemanticJudge: Send + Sync {
    async fn review(
        &self,
        candidates: &[ReviewCandidate],
    ) -> Result<Vec<Option<Verdict>>, JudgeError>;
}

/// Judge that never has an opinion. Wired when semantic review is
/// disabled so the engine's plumbing stays uniform.
pub struct NoopJudge;

#[async_trait]
impl SemanticJudge for NoopJudge {
    async fn review(
        &self,
        candidates: &[ReviewCandidate],
    ) -> Result<Vec<Option<Verdict>>, JudgeError> {
        Ok(vec![None; candidates.len()])
    }
}

/// Scripted judge for tests: verdicts are keyed by invoice number, and the
/// whole call can be forced to fail. Calls are counted so tests can assert
/// on batching.
#[derive(Default)]
pub struct MockJudge {
    verdicts: Mutex<HashMap<String, Verdict>>,
    fail: Mutex<bool>,
    calls: Mutex<usize>,
}

impl MockJudge {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script(&self, invoice_number: &str, verdict: Verdict) {
        self.verdicts
            .lock()
            .await
            .insert(invoice_number.to_string(), verdict);
    }

    pub async fn fail_next_calls(&self, fail: bool) {
        *self.fail.lock().await = fail;
    }

    pub async fn call_count(&self) -> usize {
        *self.calls.lock().await
    }
}

#[async_trait]
impl SemanticJudge for MockJudge {
    async fn review(
        &self,
        candidates: &[ReviewCandidate],
    ) -> Result<Vec<Option<Verdict>>, JudgeError> {
        *self.calls.lock().await += 1;
        if *self.fail.lock().await {
            return Err(JudgeError::Api("scripted failure".to_string()));
        }

        let verdicts = self.verdicts.lock().await;
        Ok(candidates
            .iter()
            .map(|candidate| verdicts.get(&candidate.invoice_number).cloned())
            .collect())
    }
}

/// Fold a verdict into a match. Confirmation lifts the score to the
/// adjusted value (never lower than it was, never above the ceiling) and
/// re-derives confidence and auto-apply from the thresholds. Rejection
/// scales the score down with a floor and forces low confidence. Verdicts
/// below `min_confidence`, or carrying non-finite numbers, change nothing.
pub fn apply_verdict(
    result: &mut MatchResult,
    verdict: &Verdict,
    config: &MatchingConfig,
    min_confidence: f64,
) -> VerdictOutcome {
    if !verdict.confidence.is_finite() || !verdict.adjusted_score.is_finite() {
        return VerdictOutcome::Inconclusive;
    }
    if verdict.confidence < min_confidence {
        return VerdictOutcome::Inconclusive;
    }

    if verdict.is_match {
        let adjusted = verdict.adjusted_score.clamp(0.0, 1.0);
        result.score = result.score.max(adjusted).min(AI_CONFIRMED_CEILING);
        let (confidence, auto_match) = evaluator::classify(result.score, config);
        result.confidence = confidence;
        result.auto_match = auto_match;
        result.match_type = format!("{}_ai_enhanced", result.match_type);
        append_reasoning(result, verdict);
        VerdictOutcome::Confirmed
    } else {
        result.score = (result.score * AI_REJECTED_MULTIPLIER).max(AI_REJECTED_FLOOR);
        result.confidence = crate::models::ConfidenceLevel::Low;
        result.auto_match = false;
        result.match_type = format!("{}_ai_rejected", result.match_type);
        append_reasoning(result, verdict);
        VerdictOutcome::Rejected
    }
}

fn append_reasoning(result: &mut MatchResult, verdict: &Verdict) {
    if !verdict.reasoning.is_empty() {
        result.explanation = format!("{} | AI: {}", result.explanation, verdict.reasoning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConfidenceLevel;

    fn result(score: f64) -> MatchResult {
        MatchResult {
            invoice_id: "inv-1".to_string(),
            transaction_id: "txn-1".to_string(),
            score,
            match_type: "amount".to_string(),
            criteria_scores: CriteriaScores {
                amount: 1.0,
                date: 0.9,
                vendor: 0.0,
                entity: 0.5,
                pattern: 0.0,
            },
            confidence: ConfidenceLevel::Medium,
            auto_match: false,
            explanation: "Possible match".to_string(),
        }
    }

    fn verdict(is_match: bool, confidence: f64, adjusted: f64) -> Verdict {
        Verdict {
            is_match,
            confidence,
            reasoning: "vendor alias".to_string(),
            adjusted_score: adjusted,
        }
    }

    #[test]
    fn confirmation_lifts_score_to_ceiling_and_rederives_bands() {
        let config = MatchingConfig::default();
        let mut m = result(0.80);

        let outcome = apply_verdict(&mut m, &verdict(true, 0.9, 0.99), &config, 0.7);
        assert_eq!(outcome, VerdictOutcome::Confirmed);
        assert_eq!(m.score, 0.95);
        assert_eq!(m.confidence, ConfidenceLevel::High);
        assert!(m.auto_match);
        assert_eq!(m.match_type, "amount_ai_enhanced");
        assert!(m.explanation.ends_with("AI: vendor alias"));
    }

    #[test]
    fn confirmation_never_lowers_the_score() {
        let config = MatchingConfig::default();
        let mut m = result(0.82);

        apply_verdict(&mut m, &verdict(true, 0.9, 0.60), &config, 0.7);
        assert_eq!(m.score, 0.82);
        assert_eq!(m.confidence, ConfidenceLevel::Medium);
        assert!(!m.auto_match);
        assert_eq!(m.match_type, "amount_ai_enhanced");
    }

    #[test]
    fn rejection_scales_down_with_floor() {
        let config = MatchingConfig::default();
        let mut m = result(0.80);

        let outcome = apply_verdict(&mut m, &verdict(false, 0.95, 0.1), &config, 0.7);
        assert_eq!(outcome, VerdictOutcome::Rejected);
        assert!((m.score - 0.56).abs() < 1e-12);
        assert_eq!(m.confidence, ConfidenceLevel::Low);
        assert!(!m.auto_match);
        assert_eq!(m.match_type, "amount_ai_rejected");

        let mut weak = result(0.30);
        apply_verdict(&mut weak, &verdict(false, 0.95, 0.1), &config, 0.7);
        assert_eq!(weak.score, 0.3);
    }

    #[test]
    fn low_confidence_verdicts_change_nothing() {
        let config = MatchingConfig::default();
        let mut m = result(0.80);
        let before = m.clone();

        let outcome = apply_verdict(&mut m, &verdict(true, 0.5, 0.99), &config, 0.7);
        assert_eq!(outcome, VerdictOutcome::Inconclusive);
        assert_eq!(m, before);
    }

    #[test]
    fn non_finite_verdicts_change_nothing() {
        let config = MatchingConfig::default();
        let mut m = result(0.80);
        let before = m.clone();

        apply_verdict(&mut m, &verdict(true, f64::NAN, 0.9), &config, 0.7);
        apply_verdict(&mut m, &verdict(true, 0.9, f64::INFINITY), &config, 0.7);
        assert_eq!(m, before);
    }

    #[tokio::test]
    async fn noop_judge_has_no_opinions() {
        let judge = NoopJudge;
        let inv = crate::models::Invoice {
            id: "inv-1".to_string(),
            invoice_number: "INV-1".to_string(),
            vendor_name: "Acme".to_string(),
            total_amount: Decimal::new(100, 0),
            currency: "USD".to_string(),
            issue_date: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            due_date: None,
            business_unit: String::new(),
            status: "sent".to_string(),
            linked_transaction_id: None,
        };
        let txn = LedgerTransaction {
            transaction_id: "txn-1".to_string(),
            date: "2024-01-01".to_string(),
            description: "ACME".to_string(),
            amount: Decimal::new(-100, 0),
            currency: "USD".to_string(),
            classified_entity: None,
        };
        let candidates = vec![ReviewCandidate::new(&inv, &txn, &result(0.8))];

        let verdicts = judge.review(&candidates).await.unwrap();
        assert_eq!(verdicts.len(), 1);
        assert!(verdicts[0].is_none());
    }
}
