//! Storage contract consumed by the matching engine.
//!
//! The engine never talks to a database directly; it sees this trait. The
//! production implementation is [`crate::services::Database`] on Postgres,
//! and [`crate::services::InMemoryLedger`] backs hermetic tests.

use crate::error::MatcherError;
use crate::models::{
    Invoice, LedgerTransaction, MatchApplication, MatchAuditEntry, PendingReviewMatch,
};
use crate::utils::dates;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Result of a storage health probe. Probes report rather than fail: an
/// unhealthy store is an expected state the engine must handle.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

/// One write the engine wants applied to the ledger.
#[derive(Debug, Clone)]
pub enum LedgerWrite {
    /// Link a transaction onto an invoice, mark it paid, and record the
    /// application in the audit log. Skipped when the invoice was already
    /// linked by a concurrent run.
    ApplyMatch(MatchApplication),
    /// Queue a match for human review; a duplicate of an existing
    /// invoice/transaction pair is a no-op.
    QueuePending(PendingReviewMatch),
    /// Append an audit log entry.
    Audit(MatchAuditEntry),
}

/// Identity of one invoice/transaction pairing as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchKey {
    pub invoice_id: String,
    pub transaction_id: String,
}

/// Outcome of a chunked batch write. Chunks are transactional: a failed
/// chunk rolls back whole and is recorded here, while later chunks still
/// run.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub successful_batches: usize,
    pub failed_batches: usize,
    /// Writes that were part of a committed chunk, no-ops included.
    pub succeeded_ops: usize,
    /// Rows actually touched; lower than `succeeded_ops` when conflict
    /// no-ops occurred.
    pub rows_affected: u64,
    /// Pairs whose apply write actually linked an invoice. A guarded
    /// no-op on an already-linked invoice does not appear here.
    pub applied: Vec<MatchKey>,
    /// Pairs whose pending insert created a new row; conflict no-ops do
    /// not appear here.
    pub queued: Vec<MatchKey>,
    pub errors: Vec<String>,
}

impl BatchOutcome {
    pub fn merge(&mut self, other: BatchOutcome) {
        self.successful_batches += other.successful_batches;
        self.failed_batches += other.failed_batches;
        self.succeeded_ops += other.succeeded_ops;
        self.rows_affected += other.rows_affected;
        self.applied.extend(other.applied);
        self.queued.extend(other.queued);
        self.errors.extend(other.errors);
    }
}

/// Everything the engine needs from storage.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Probe storage. Never errors; failures are reported in the result.
    async fn health_check(&self) -> HealthReport;

    /// Invoices with no linked transaction, newest first then largest
    /// first. `ids` restricts the set when present.
    async fn unmatched_invoices(&self, ids: Option<&[String]>)
        -> Result<Vec<Invoice>, MatcherError>;

    /// Nonzero-amount transactions dated within the trailing window,
    /// newest first then largest magnitude first.
    async fn candidate_transactions(
        &self,
        window_days: i64,
    ) -> Result<Vec<LedgerTransaction>, MatcherError>;

    /// Apply writes in transactional chunks of `batch_size`. A failing
    /// chunk is rolled back and recorded; remaining chunks still execute.
    async fn execute_batch(&self, writes: Vec<LedgerWrite>, batch_size: usize) -> BatchOutcome;
}

/// Candidate ordering shared by every store implementation. Transaction
/// dates are raw text, so the window filter and ordering happen here after
/// parsing, not in SQL. Rows whose date cannot be parsed are kept (they can
/// still match on amount or vendor) and sort last.
pub fn filter_and_order_candidates(
    rows: Vec<LedgerTransaction>,
    cutoff: NaiveDate,
) -> Vec<LedgerTransaction> {
    let mut keyed: Vec<(Option<NaiveDate>, LedgerTransaction)> = rows
        .into_iter()
        .filter(|row| !row.amount.is_zero())
        .map(|row| (dates::parse_flexible(&row.date), row))
        .filter(|(date, _)| date.map_or(true, |d| d >= cutoff))
        .collect();

    keyed.sort_by(|(date_a, row_a), (date_b, row_b)| {
        date_b
            .cmp(date_a)
            .then_with(|| row_b.amount.abs().cmp(&row_a.amount.abs()))
    });

    keyed.into_iter().map(|(_, row)| row).collect()
}

/// Invoice ordering: newest issue date first, then largest total first.
/// The Postgres store orders in SQL; the in-memory store uses this to
/// mirror it.
pub fn order_invoices(mut invoices: Vec<Invoice>) -> Vec<Invoice> {
    invoices.sort_by(|a, b| {
        b.issue_date
            .cmp(&a.issue_date)
            .then_with(|| b.total_amount.cmp(&a.total_amount))
    });
    invoices
}
