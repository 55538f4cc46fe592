//! In-memory [`LedgerStore`] used by tests and local dry runs.
//!
//! Mirrors the Postgres implementation's semantics closely enough that the
//! engine cannot tell them apart: same ordering, same conflict no-ops, same
//! transactional chunking. Failure injection switches let tests exercise
//! the degraded paths without a database.

use crate::error::MatcherError;
use crate::models::{
    AuditAction, Invoice, LedgerTransaction, MatchApplication, MatchAuditEntry,
    PendingReviewMatch,
};
use crate::services::store::{
    filter_and_order_candidates, order_invoices, BatchOutcome, HealthReport, LedgerStore,
    LedgerWrite, MatchKey,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::time::Instant;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    invoices: Vec<Invoice>,
    transactions: Vec<LedgerTransaction>,
    pending: Vec<PendingReviewMatch>,
    audit: Vec<MatchAuditEntry>,
    unhealthy: bool,
    fail_reads: bool,
    /// Chunk ordinals (within one `execute_batch` call) that fail.
    failing_chunks: HashSet<usize>,
}

#[derive(Default)]
pub struct InMemoryLedger {
    state: RwLock<State>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_invoice(&self, invoice: Invoice) {
        self.state.write().await.invoices.push(invoice);
    }

    pub async fn seed_transaction(&self, transaction: LedgerTransaction) {
        self.state.write().await.transactions.push(transaction);
    }

    /// Make subsequent health probes report unhealthy.
    pub async fn set_unhealthy(&self, unhealthy: bool) {
        self.state.write().await.unhealthy = unhealthy;
    }

    /// Make subsequent reads fail with a storage error.
    pub async fn set_fail_reads(&self, fail: bool) {
        self.state.write().await.fail_reads = fail;
    }

    /// Make the given chunk ordinal fail in subsequent `execute_batch`
    /// calls.
    pub async fn fail_chunk(&self, ordinal: usize) {
        self.state.write().await.failing_chunks.insert(ordinal);
    }

    pub async fn invoice(&self, id: &str) -> Option<Invoice> {
        self.state
            .read()
            .await
            .invoices
            .iter()
            .find(|invoice| invoice.id == id)
            .cloned()
    }

    pub async fn pending_rows(&self) -> Vec<PendingReviewMatch> {
        self.state.read().await.pending.clone()
    }

    pub async fn audit_entries(&self) -> Vec<MatchAuditEntry> {
        self.state.read().await.audit.clone()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        let unhealthy = self.state.read().await.unhealthy;
        let response_time_ms = started.elapsed().as_millis() as u64;

        if unhealthy {
            HealthReport {
                healthy: false,
                response_time_ms,
                error: Some("simulated outage".to_string()),
            }
        } else {
            HealthReport {
                healthy: true,
                response_time_ms,
                error: None,
            }
        }
    }

    async fn unmatched_invoices(
        &self,
        ids: Option<&[String]>,
    ) -> Result<Vec<Invoice>, MatcherError> {
        let state = self.state.read().await;
        if state.fail_reads {
            return Err(MatcherError::Storage(anyhow::anyhow!(
                "simulated read failure"
            )));
        }

        let invoices = state
            .invoices
            .iter()
            .filter(|invoice| invoice.is_unmatched())
            .filter(|invoice| ids.map_or(true, |ids| ids.contains(&invoice.id)))
            .cloned()
            .collect();

        Ok(order_invoices(invoices))
    }

    async fn candidate_transactions(
        &self,
        window_days: i64,
    ) -> Result<Vec<LedgerTransaction>, MatcherError> {
        let state = self.state.read().await;
        if state.fail_reads {
            return Err(MatcherError::Storage(anyhow::anyhow!(
                "simulated read failure"
            )));
        }

        let cutoff = Utc::now().date_naive() - Duration::days(window_days);
        Ok(filter_and_order_candidates(
            state.transactions.clone(),
            cutoff,
        ))
    }

    async fn execute_batch(&self, writes: Vec<LedgerWrite>, batch_size: usize) -> BatchOutcome {
        let mut state = self.state.write().await;
        let mut outcome = BatchOutcome::default();

        for (ordinal, chunk) in writes.chunks(batch_size.max(1)).enumerate() {
            if state.failing_chunks.contains(&ordinal) {
                outcome.failed_batches += 1;
                outcome
                    .errors
                    .push(format!("chunk {}: simulated write failure", ordinal));
                continue;
            }

            for write in chunk {
                match write {
                    LedgerWrite::ApplyMatch(application) => {
                        let rows = apply_match(&mut state, application);
                        if rows > 0 {
                            outcome.rows_affected += rows;
                            outcome.applied.push(MatchKey {
                                invoice_id: application.invoice_id.clone(),
                                transaction_id: application.transaction_id.clone(),
                            });
                        }
                    }
                    LedgerWrite::QueuePending(pending) => {
                        let duplicate = state.pending.iter().any(|row| {
                            row.invoice_id == pending.invoice_id
                                && row.transaction_id == pending.transaction_id
                        });
                        if !duplicate {
                            state.pending.push(pending.clone());
                            outcome.rows_affected += 1;
                            outcome.queued.push(MatchKey {
                                invoice_id: pending.invoice_id.clone(),
                                transaction_id: pending.transaction_id.clone(),
                            });
                        }
                    }
                    LedgerWrite::Audit(entry) => {
                        state.audit.push(entry.clone());
                        outcome.rows_affected += 1;
                    }
                }
            }

            outcome.successful_batches += 1;
            outcome.succeeded_ops += chunk.len();
        }

        outcome
    }
}

/// Link the transaction and write the audit row, exactly like the Postgres
/// store's single-transaction apply. Already-linked and unknown invoices
/// are no-ops.
fn apply_match(state: &mut State, application: &MatchApplication) -> u64 {
    let invoice = state
        .invoices
        .iter_mut()
        .find(|invoice| invoice.id == application.invoice_id && invoice.is_unmatched());

    let Some(invoice) = invoice else {
        return 0;
    };

    invoice.linked_transaction_id = Some(application.transaction_id.clone());
    invoice.status = "paid".to_string();

    state.audit.push(MatchAuditEntry {
        id: Uuid::new_v4(),
        invoice_id: application.invoice_id.clone(),
        transaction_id: application.transaction_id.clone(),
        action: AuditAction::AutoApplied,
        score: application.score,
        match_type: application.match_type.clone(),
        actor: "revenue-matcher".to_string(),
        created_utc: Utc::now(),
    });

    2
}
