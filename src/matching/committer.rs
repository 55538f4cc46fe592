//! Persistence of match results.
//!
//! Auto-apply eligible matches and pending-review matches go to storage as
//! two separate chunked batches so a failure in one set never blocks the
//! other. AI verdict audit entries ride in a third batch.

use crate::models::{MatchApplication, MatchAuditEntry, MatchResult, PendingReviewMatch};
use crate::services::metrics;
use crate::services::store::{BatchOutcome, LedgerStore, LedgerWrite, MatchKey};
use tracing::info;

/// What persistence accomplished, folded into the run report. The counters
/// reflect writes that actually took effect: a guarded no-op on an
/// already-linked invoice or a conflict no-op on a duplicate pending pair
/// counts nothing.
#[derive(Debug, Clone, Default)]
pub struct CommitSummary {
    pub auto_applied: usize,
    pub pending_review: usize,
    pub failed_batches: usize,
    pub rows_affected: u64,
    /// Pairs linked during this commit.
    pub applied: Vec<MatchKey>,
    pub errors: Vec<String>,
}

/// Persist a run's matches. With `auto_apply` set, high-confidence matches
/// are applied to the ledger; everything else is queued for review.
pub async fn commit_results(
    store: &dyn LedgerStore,
    results: &[MatchResult],
    ai_audit: &[MatchAuditEntry],
    auto_apply: bool,
    write_batch_size: usize,
) -> CommitSummary {
    let mut applications = Vec::new();
    let mut pending = Vec::new();

    for result in results {
        if auto_apply && result.auto_match {
            applications.push(LedgerWrite::ApplyMatch(MatchApplication::from_result(
                result,
            )));
        } else {
            pending.push(LedgerWrite::QueuePending(PendingReviewMatch::from_result(
                result,
            )));
        }
    }

    let mut total = BatchOutcome::default();

    if !applications.is_empty() {
        total.merge(store.execute_batch(applications, write_batch_size).await);
    }

    if !pending.is_empty() {
        total.merge(store.execute_batch(pending, write_batch_size).await);
    }

    if !ai_audit.is_empty() {
        let writes: Vec<LedgerWrite> = ai_audit.iter().cloned().map(LedgerWrite::Audit).collect();
        total.merge(store.execute_batch(writes, write_batch_size).await);
    }

    let summary = CommitSummary {
        auto_applied: total.applied.len(),
        pending_review: total.queued.len(),
        failed_batches: total.failed_batches,
        rows_affected: total.rows_affected,
        applied: total.applied,
        errors: total.errors,
    };
    metrics::record_commits("applied", summary.auto_applied);
    metrics::record_commits("pending_review", summary.pending_review);

    info!(
        auto_applied = summary.auto_applied,
        pending_review = summary.pending_review,
        failed_batches = summary.failed_batches,
        "Persisted match results"
    );

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditAction, ConfidenceLevel, CriteriaScores, Invoice};
    use crate::services::memory::InMemoryLedger;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn invoice(id: &str) -> Invoice {
        Invoice {
            id: id.to_string(),
            invoice_number: format!("INV-{}", id),
            vendor_name: "Acme Corp".to_string(),
            total_amount: Decimal::new(100000, 2),
            currency: "USD".to_string(),
            issue_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            due_date: None,
            business_unit: String::new(),
            status: "sent".to_string(),
            linked_transaction_id: None,
        }
    }

    fn result(invoice_id: &str, transaction_id: &str, auto_match: bool) -> MatchResult {
        MatchResult {
            invoice_id: invoice_id.to_string(),
            transaction_id: transaction_id.to_string(),
            score: if auto_match { 0.95 } else { 0.6 },
            match_type: "amount".to_string(),
            criteria_scores: CriteriaScores {
                amount: 1.0,
                date: 0.9,
                vendor: 0.5,
                entity: 0.5,
                pattern: 0.0,
            },
            confidence: if auto_match {
                ConfidenceLevel::High
            } else {
                ConfidenceLevel::Medium
            },
            auto_match,
            explanation: String::new(),
        }
    }

    #[tokio::test]
    async fn auto_apply_splits_matches_by_eligibility() {
        let store = InMemoryLedger::new();
        store.seed_invoice(invoice("inv-1")).await;
        store.seed_invoice(invoice("inv-2")).await;

        let results = vec![result("inv-1", "txn-1", true), result("inv-2", "txn-2", false)];
        let summary = commit_results(&store, &results, &[], true, 25).await;

        assert_eq!(summary.auto_applied, 1);
        assert_eq!(summary.pending_review, 1);
        assert_eq!(summary.failed_batches, 0);

        assert!(store.invoice("inv-1").await.unwrap().linked_transaction_id.is_some());
        assert!(store.invoice("inv-2").await.unwrap().linked_transaction_id.is_none());
        assert_eq!(store.pending_rows().await.len(), 1);
    }

    #[tokio::test]
    async fn without_auto_apply_everything_queues_for_review() {
        let store = InMemoryLedger::new();
        store.seed_invoice(invoice("inv-1")).await;

        let results = vec![result("inv-1", "txn-1", true)];
        let summary = commit_results(&store, &results, &[], false, 25).await;

        assert_eq!(summary.auto_applied, 0);
        assert_eq!(summary.pending_review, 1);
        assert!(store.invoice("inv-1").await.unwrap().linked_transaction_id.is_none());
        assert_eq!(store.pending_rows().await.len(), 1);
    }

    #[tokio::test]
    async fn competing_applies_for_one_invoice_count_once() {
        let store = InMemoryLedger::new();
        store.seed_invoice(invoice("inv-1")).await;

        // Two high-confidence candidates for the same invoice: the second
        // apply hits the linked-invoice guard and must not be counted.
        let results = vec![result("inv-1", "txn-1", true), result("inv-1", "txn-2", true)];
        let summary = commit_results(&store, &results, &[], true, 25).await;

        assert_eq!(summary.auto_applied, 1);
        assert_eq!(summary.applied.len(), 1);
        assert_eq!(summary.applied[0].transaction_id, "txn-1");
        assert_eq!(summary.failed_batches, 0);

        let linked = store.invoice("inv-1").await.unwrap();
        assert_eq!(linked.linked_transaction_id.as_deref(), Some("txn-1"));
        assert_eq!(store.audit_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn recommitted_pending_rows_count_zero() {
        let store = InMemoryLedger::new();
        store.seed_invoice(invoice("inv-1")).await;
        let results = vec![result("inv-1", "txn-1", false)];

        let first = commit_results(&store, &results, &[], false, 25).await;
        assert_eq!(first.pending_review, 1);

        // The conflict no-op on the second commit inserts nothing, so it
        // reports nothing.
        let second = commit_results(&store, &results, &[], false, 25).await;
        assert_eq!(second.pending_review, 0);
        assert_eq!(second.failed_batches, 0);
        assert_eq!(store.pending_rows().await.len(), 1);
    }

    #[tokio::test]
    async fn ai_audit_entries_are_persisted() {
        let store = InMemoryLedger::new();
        let reviewed = result("inv-1", "txn-1", false);
        let entry = MatchAuditEntry::new(&reviewed, AuditAction::AiRejected, "semantic-judge");

        let summary = commit_results(&store, &[], &[entry], false, 25).await;

        assert_eq!(summary.auto_applied, 0);
        assert_eq!(summary.pending_review, 0);
        let audit = store.audit_entries().await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::AiRejected);
    }
}
