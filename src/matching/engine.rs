//! The matching run orchestrator.
//!
//! A run moves through fixed phases: health check, retrieval, batched
//! scoring, semantic review, persistence. Only a failed health check aborts
//! the run; every later failure is contained to its batch, pair, or chunk
//! and surfaces through the report's error counters instead.

use crate::config::MatcherConfig;
use crate::learning::LearningAdapter;
use crate::models::{
    AuditAction, BatchStats, ConfidenceLevel, Invoice, LedgerTransaction, MatchAuditEntry,
    MatchFeedback, MatchResult, MatchSummary, RunOptions, RunReport, RunStats,
};
use crate::scoring;
use crate::semantic::{self, ReviewCandidate, SemanticJudge, VerdictOutcome};
use crate::services::metrics;
use crate::services::store::{LedgerStore, MatchKey};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::committer;
use super::evaluator::MatchEvaluator;

/// Actor name stamped on audit rows and feedback written by the engine
/// itself.
const ENGINE_ACTOR: &str = "revenue-matcher";

/// Actor name stamped on audit rows produced by semantic verdicts.
const JUDGE_ACTOR: &str = "semantic-judge";

pub struct RevenueMatcher {
    config: MatcherConfig,
    store: Arc<dyn LedgerStore>,
    judge: Arc<dyn SemanticJudge>,
    learning: Arc<dyn LearningAdapter>,
    evaluator: MatchEvaluator,
}

impl RevenueMatcher {
    pub fn new(
        config: MatcherConfig,
        store: Arc<dyn LedgerStore>,
        judge: Arc<dyn SemanticJudge>,
        learning: Arc<dyn LearningAdapter>,
    ) -> Self {
        let evaluator = MatchEvaluator::new(config.matching.clone());
        Self {
            config,
            store,
            judge,
            learning,
            evaluator,
        }
    }

    /// Execute one matching run. Never fails outright: an unhealthy store
    /// produces an aborted report, and everything else degrades into the
    /// report's counters.
    pub async fn run(&self, options: RunOptions) -> RunReport {
        let started = Instant::now();
        let mut stats = RunStats::default();

        info!(
            auto_apply = options.auto_apply,
            learning = options.learning_enabled,
            restricted = options.invoice_ids.is_some(),
            "Starting matching run"
        );

        let health = self.store.health_check().await;
        if !health.healthy {
            let message = health
                .error
                .unwrap_or_else(|| "storage unhealthy".to_string());
            error!(
                response_time_ms = health.response_time_ms,
                error = %message,
                "Storage health check failed, aborting run"
            );
            metrics::record_error("health_check");
            stats.processing_time_seconds = started.elapsed().as_secs_f64();
            metrics::record_run("aborted", stats.processing_time_seconds);
            return RunReport::aborted(
                format!("storage health check failed: {}", message),
                stats,
            );
        }
        debug!(response_time_ms = health.response_time_ms, "Storage healthy");

        let invoices = match self
            .store
            .unmatched_invoices(options.invoice_ids.as_deref())
            .await
        {
            Ok(invoices) => invoices,
            Err(err) => {
                warn!(error = %err, "Invoice retrieval failed, continuing with empty set");
                metrics::record_error("retrieval");
                stats.errors_count += 1;
                Vec::new()
            }
        };

        let candidates = match self
            .store
            .candidate_transactions(self.config.matching.candidate_window_days)
            .await
        {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(error = %err, "Candidate retrieval failed, continuing with empty set");
                metrics::record_error("retrieval");
                stats.errors_count += 1;
                Vec::new()
            }
        };

        stats.total_invoices_processed = invoices.len();
        info!(
            invoices = invoices.len(),
            candidates = candidates.len(),
            "Retrieved matching inputs"
        );

        let mut matches: Vec<MatchResult> = Vec::new();
        if !invoices.is_empty() && !candidates.is_empty() {
            for (index, batch) in invoices.chunks(self.config.matching.batch_size).enumerate() {
                match self
                    .process_batch(batch, &candidates, options.learning_enabled)
                    .await
                {
                    Ok(found) => {
                        debug!(batch = index, matches = found.len(), "Batch processed");
                        stats.batch_stats.push(BatchStats {
                            batch_index: index,
                            invoice_count: batch.len(),
                            matches_found: found.len(),
                            error: None,
                        });
                        matches.extend(found);
                    }
                    Err(err) => {
                        error!(batch = index, error = %err, "Batch failed, continuing");
                        metrics::record_error("batch");
                        stats.errors_count += 1;
                        stats.batch_stats.push(BatchStats {
                            batch_index: index,
                            invoice_count: batch.len(),
                            matches_found: 0,
                            error: Some(err.to_string()),
                        });
                    }
                }
            }
        }
        stats.total_matches_found = matches.len();

        let invoices_by_id: HashMap<&str, &Invoice> = invoices
            .iter()
            .map(|invoice| (invoice.id.as_str(), invoice))
            .collect();
        let transactions_by_id: HashMap<&str, &LedgerTransaction> = candidates
            .iter()
            .map(|transaction| (transaction.transaction_id.as_str(), transaction))
            .collect();

        let mut ai_audit = Vec::new();
        if self.config.semantic.enabled && !matches.is_empty() {
            ai_audit = self
                .semantic_review(&mut matches, &invoices_by_id, &transactions_by_id)
                .await;
        }

        for result in &matches {
            metrics::record_match_found(result.confidence.as_str());
            match result.confidence {
                ConfidenceLevel::High => stats.high_confidence_matches += 1,
                ConfidenceLevel::Medium => stats.medium_confidence_matches += 1,
                ConfidenceLevel::Low => {}
            }
        }

        let summary = committer::commit_results(
            self.store.as_ref(),
            &matches,
            &ai_audit,
            options.auto_apply,
            self.config.matching.write_batch_size,
        )
        .await;
        stats.auto_applied_matches = summary.auto_applied;
        stats.pending_review_matches = summary.pending_review;
        stats.errors_count += summary.errors.len();
        for _ in &summary.errors {
            metrics::record_error("persistence");
        }

        if options.auto_apply {
            self.record_feedback(&matches, &summary.applied).await;
        }

        stats.processing_time_seconds = started.elapsed().as_secs_f64();
        metrics::record_run("success", stats.processing_time_seconds);
        info!(
            total_matches = stats.total_matches_found,
            auto_applied = stats.auto_applied_matches,
            pending_review = stats.pending_review_matches,
            errors = stats.errors_count,
            elapsed_secs = stats.processing_time_seconds,
            "Matching run complete"
        );

        let summaries = matches
            .iter()
            .filter_map(|result| summarize(result, &invoices_by_id, &transactions_by_id))
            .collect();

        RunReport {
            success: true,
            error: None,
            stats,
            matches: summaries,
        }
    }

    /// Score one batch of invoices against every candidate, keeping the
    /// ranked best per invoice. A learning failure on one pair falls back
    /// to that pair's raw scores.
    async fn process_batch(
        &self,
        invoices: &[Invoice],
        candidates: &[LedgerTransaction],
        learning_enabled: bool,
    ) -> Result<Vec<MatchResult>, crate::error::MatcherError> {
        let mut found = Vec::new();

        for invoice in invoices {
            let mut scored = Vec::new();
            for transaction in candidates {
                let raw = scoring::score_pair(invoice, transaction);
                let scores = if learning_enabled {
                    match self.learning.adjust(&raw, invoice, transaction).await {
                        Ok(adjusted) => adjusted.clamped(),
                        Err(err) => {
                            debug!(
                                invoice_id = %invoice.id,
                                transaction_id = %transaction.transaction_id,
                                error = %err,
                                "Learning adjustment failed, using raw scores"
                            );
                            raw
                        }
                    }
                } else {
                    raw
                };

                if let Some(result) = self.evaluator.finalize(invoice, transaction, scores) {
                    scored.push(result);
                }
            }
            found.extend(self.evaluator.rank(scored));
        }

        Ok(found)
    }

    /// Send matches in the uncertainty window to the judge in small
    /// batches and fold confident verdicts back in. A failed batch keeps
    /// its deterministic scores.
    async fn semantic_review(
        &self,
        matches: &mut [MatchResult],
        invoices_by_id: &HashMap<&str, &Invoice>,
        transactions_by_id: &HashMap<&str, &LedgerTransaction>,
    ) -> Vec<MatchAuditEntry> {
        let semantic_config = &self.config.semantic;

        let uncertain: Vec<usize> = matches
            .iter()
            .enumerate()
            .filter(|(_, result)| {
                result.score >= semantic_config.window_low
                    && result.score < semantic_config.window_high
            })
            .map(|(index, _)| index)
            .collect();

        if uncertain.is_empty() {
            debug!("No matches in the semantic review window");
            return Vec::new();
        }

        info!(
            count = uncertain.len(),
            window_low = semantic_config.window_low,
            window_high = semantic_config.window_high,
            "Reviewing uncertain matches"
        );

        let mut audit = Vec::new();
        let mut reviewed_since_pause = 0usize;

        for chunk in uncertain.chunks(semantic_config.review_batch_size) {
            let pairs: Vec<(usize, ReviewCandidate)> = chunk
                .iter()
                .filter_map(|&index| {
                    let result = &matches[index];
                    let invoice = invoices_by_id.get(result.invoice_id.as_str())?;
                    let transaction = transactions_by_id.get(result.transaction_id.as_str())?;
                    Some((index, ReviewCandidate::new(invoice, transaction, result)))
                })
                .collect();
            if pairs.is_empty() {
                continue;
            }

            let candidates: Vec<ReviewCandidate> =
                pairs.iter().map(|(_, candidate)| candidate.clone()).collect();

            match self.judge.review(&candidates).await {
                Ok(verdicts) => {
                    for ((index, _), verdict) in pairs.iter().zip(verdicts) {
                        let Some(verdict) = verdict else {
                            metrics::record_semantic_verdict("inconclusive");
                            continue;
                        };

                        let result = &mut matches[*index];
                        let outcome = semantic::apply_verdict(
                            result,
                            &verdict,
                            &self.config.matching,
                            semantic_config.min_confidence,
                        );
                        match outcome {
                            VerdictOutcome::Confirmed => {
                                metrics::record_semantic_verdict("confirmed");
                                audit.push(MatchAuditEntry::new(
                                    result,
                                    AuditAction::AiEnhanced,
                                    JUDGE_ACTOR,
                                ));
                            }
                            VerdictOutcome::Rejected => {
                                metrics::record_semantic_verdict("rejected");
                                audit.push(MatchAuditEntry::new(
                                    result,
                                    AuditAction::AiRejected,
                                    JUDGE_ACTOR,
                                ));
                            }
                            VerdictOutcome::Inconclusive => {
                                metrics::record_semantic_verdict("inconclusive");
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        batch_size = candidates.len(),
                        "Semantic review failed for batch, keeping deterministic scores"
                    );
                    metrics::record_semantic_verdict("failed");
                }
            }

            reviewed_since_pause += chunk.len();
            if reviewed_since_pause >= semantic_config.pace_every {
                debug!(
                    delay_ms = semantic_config.pace_delay_ms,
                    "Pacing semantic review"
                );
                sleep(Duration::from_millis(semantic_config.pace_delay_ms)).await;
                reviewed_since_pause = 0;
            }
        }

        audit
    }

    /// Report matches the committer actually linked back to the learning
    /// adapter. Candidates whose apply was a no-op or whose chunk rolled
    /// back record nothing. Failures are logged and dropped; feedback
    /// never affects the run outcome.
    async fn record_feedback(&self, matches: &[MatchResult], applied: &[MatchKey]) {
        let applied: HashSet<(&str, &str)> = applied
            .iter()
            .map(|key| (key.invoice_id.as_str(), key.transaction_id.as_str()))
            .collect();

        for result in matches.iter().filter(|result| {
            applied.contains(&(result.invoice_id.as_str(), result.transaction_id.as_str()))
        }) {
            let feedback = MatchFeedback {
                invoice_id: result.invoice_id.clone(),
                transaction_id: result.transaction_id.clone(),
                criteria_scores: result.criteria_scores,
                score: result.score,
                accepted: true,
                actor: ENGINE_ACTOR.to_string(),
            };
            if let Err(err) = self.learning.record_feedback(feedback).await {
                debug!(
                    invoice_id = %result.invoice_id,
                    error = %err,
                    "Feedback recording failed"
                );
            }
        }
    }
}

fn summarize(
    result: &MatchResult,
    invoices_by_id: &HashMap<&str, &Invoice>,
    transactions_by_id: &HashMap<&str, &LedgerTransaction>,
) -> Option<MatchSummary> {
    let invoice = invoices_by_id.get(result.invoice_id.as_str())?;
    let transaction = transactions_by_id.get(result.transaction_id.as_str())?;

    Some(MatchSummary {
        invoice_id: result.invoice_id.clone(),
        invoice_number: invoice.invoice_number.clone(),
        vendor_name: invoice.vendor_name.clone(),
        invoice_amount: invoice.total_amount,
        transaction_id: result.transaction_id.clone(),
        transaction_description: transaction.description.clone(),
        transaction_amount: transaction.amount,
        transaction_date: transaction.date.clone(),
        score: result.score,
        match_type: result.match_type.clone(),
        confidence: result.confidence,
        auto_match: result.auto_match,
        explanation: result.explanation.clone(),
    })
}
