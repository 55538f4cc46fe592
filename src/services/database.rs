//! Postgres-backed [`LedgerStore`].

use crate::error::MatcherError;
use crate::models::{Invoice, LedgerTransaction};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{
    filter_and_order_candidates, BatchOutcome, HealthReport, LedgerStore, LedgerWrite, MatchKey,
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, instrument, warn};

/// Transient read failures are retried this many times before giving up.
const READ_RETRY_ATTEMPTS: u32 = 3;
const READ_RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "revenue-matcher"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, MatcherError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| MatcherError::Storage(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), MatcherError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| MatcherError::Storage(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Retry a read on transient failures with doubling backoff. Permanent
    /// errors surface on the first attempt.
    async fn fetch_with_retry<T, F, Fut>(
        &self,
        operation: &str,
        mut query: F,
    ) -> Result<T, MatcherError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut delay = READ_RETRY_BASE_DELAY;
        let mut attempt = 1;

        loop {
            match query().await {
                Ok(value) => return Ok(value),
                Err(error) if is_transient(&error) && attempt < READ_RETRY_ATTEMPTS => {
                    warn!(
                        operation = operation,
                        attempt = attempt,
                        error = %error,
                        "Transient database error, retrying"
                    );
                    sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Run one write chunk inside a single transaction. Any failure rolls
    /// the whole chunk back; the receipts list only the writes that
    /// actually changed a row.
    async fn apply_chunk(&self, chunk: &[LedgerWrite]) -> Result<ChunkReceipts, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut receipts = ChunkReceipts::default();

        for write in chunk {
            match write {
                LedgerWrite::ApplyMatch(application) => {
                    let updated = sqlx::query(
                        r#"
                        UPDATE invoices
                        SET linked_transaction_id = $2, status = 'paid', updated_utc = NOW()
                        WHERE id = $1
                          AND (linked_transaction_id IS NULL OR linked_transaction_id = '')
                        "#,
                    )
                    .bind(&application.invoice_id)
                    .bind(&application.transaction_id)
                    .execute(&mut *tx)
                    .await?;

                    // No rows means a concurrent run got there first; skip
                    // the audit row so the log reflects what happened.
                    if updated.rows_affected() > 0 {
                        receipts.rows_affected += updated.rows_affected();
                        receipts.applied.push(MatchKey {
                            invoice_id: application.invoice_id.clone(),
                            transaction_id: application.transaction_id.clone(),
                        });
                        let audited = sqlx::query(
                            r#"
                            INSERT INTO match_audit_log
                                (id, invoice_id, transaction_id, action, score, match_type,
                                 actor, created_utc)
                            VALUES ($1, $2, $3, 'auto_applied', $4, $5, 'revenue-matcher', NOW())
                            "#,
                        )
                        .bind(uuid::Uuid::new_v4())
                        .bind(&application.invoice_id)
                        .bind(&application.transaction_id)
                        .bind(application.score)
                        .bind(&application.match_type)
                        .execute(&mut *tx)
                        .await?;
                        receipts.rows_affected += audited.rows_affected();
                    }
                }
                LedgerWrite::QueuePending(pending) => {
                    let criteria = serde_json::to_value(pending.criteria_scores)
                        .unwrap_or(serde_json::Value::Null);
                    let inserted = sqlx::query(
                        r#"
                        INSERT INTO pending_invoice_matches
                            (id, invoice_id, transaction_id, score, match_type,
                             criteria_scores, confidence_level, explanation, created_utc)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                        ON CONFLICT (invoice_id, transaction_id) DO NOTHING
                        "#,
                    )
                    .bind(pending.id)
                    .bind(&pending.invoice_id)
                    .bind(&pending.transaction_id)
                    .bind(pending.score)
                    .bind(&pending.match_type)
                    .bind(criteria)
                    .bind(pending.confidence.as_str())
                    .bind(&pending.explanation)
                    .bind(pending.created_utc)
                    .execute(&mut *tx)
                    .await?;
                    if inserted.rows_affected() > 0 {
                        receipts.rows_affected += inserted.rows_affected();
                        receipts.queued.push(MatchKey {
                            invoice_id: pending.invoice_id.clone(),
                            transaction_id: pending.transaction_id.clone(),
                        });
                    }
                }
                LedgerWrite::Audit(entry) => {
                    let inserted = sqlx::query(
                        r#"
                        INSERT INTO match_audit_log
                            (id, invoice_id, transaction_id, action, score, match_type,
                             actor, created_utc)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                        "#,
                    )
                    .bind(entry.id)
                    .bind(&entry.invoice_id)
                    .bind(&entry.transaction_id)
                    .bind(entry.action.as_str())
                    .bind(entry.score)
                    .bind(&entry.match_type)
                    .bind(&entry.actor)
                    .bind(entry.created_utc)
                    .execute(&mut *tx)
                    .await?;
                    receipts.rows_affected += inserted.rows_affected();
                }
            }
        }

        tx.commit().await?;
        Ok(receipts)
    }
}

/// What one committed chunk actually did.
#[derive(Default)]
struct ChunkReceipts {
    rows_affected: u64,
    applied: Vec<MatchKey>,
    queued: Vec<MatchKey>,
}

#[async_trait]
impl LedgerStore for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> HealthReport {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();
        let started = Instant::now();

        let probe = sqlx::query("SELECT 1").execute(&self.pool).await;
        let response_time_ms = started.elapsed().as_millis() as u64;
        timer.observe_duration();

        match probe {
            Ok(_) => HealthReport {
                healthy: true,
                response_time_ms,
                error: None,
            },
            Err(error) => HealthReport {
                healthy: false,
                response_time_ms,
                error: Some(error.to_string()),
            },
        }
    }

    #[instrument(skip(self, ids), fields(restricted = ids.is_some()))]
    async fn unmatched_invoices(
        &self,
        ids: Option<&[String]>,
    ) -> Result<Vec<Invoice>, MatcherError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["unmatched_invoices"])
            .start_timer();

        let invoices = if let Some(ids) = ids {
            let ids = ids.to_vec();
            self.fetch_with_retry("unmatched_invoices", || {
                let pool = self.pool.clone();
                let ids = ids.clone();
                async move {
                    sqlx::query_as::<_, Invoice>(
                        r#"
                        SELECT id, invoice_number, vendor_name, total_amount, currency,
                               issue_date, due_date, business_unit, status,
                               linked_transaction_id
                        FROM invoices
                        WHERE (linked_transaction_id IS NULL OR linked_transaction_id = '')
                          AND id = ANY($1)
                        ORDER BY issue_date DESC, total_amount DESC
                        "#,
                    )
                    .bind(ids)
                    .fetch_all(&pool)
                    .await
                }
            })
            .await?
        } else {
            self.fetch_with_retry("unmatched_invoices", || {
                let pool = self.pool.clone();
                async move {
                    sqlx::query_as::<_, Invoice>(
                        r#"
                        SELECT id, invoice_number, vendor_name, total_amount, currency,
                               issue_date, due_date, business_unit, status,
                               linked_transaction_id
                        FROM invoices
                        WHERE (linked_transaction_id IS NULL OR linked_transaction_id = '')
                        ORDER BY issue_date DESC, total_amount DESC
                        "#,
                    )
                    .fetch_all(&pool)
                    .await
                }
            })
            .await?
        };

        timer.observe_duration();
        Ok(invoices)
    }

    #[instrument(skip(self))]
    async fn candidate_transactions(
        &self,
        window_days: i64,
    ) -> Result<Vec<LedgerTransaction>, MatcherError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["candidate_transactions"])
            .start_timer();

        // Dates are stored as raw text in mixed formats, so the window
        // filter happens in process after parsing, not in SQL.
        let rows = self
            .fetch_with_retry("candidate_transactions", || {
                let pool = self.pool.clone();
                async move {
                    sqlx::query_as::<_, LedgerTransaction>(
                        r#"
                        SELECT transaction_id, date, description, amount, currency,
                               classified_entity
                        FROM ledger_transactions
                        WHERE amount <> 0
                        "#,
                    )
                    .fetch_all(&pool)
                    .await
                }
            })
            .await?;

        timer.observe_duration();

        let cutoff = Utc::now().date_naive() - ChronoDuration::days(window_days);
        Ok(filter_and_order_candidates(rows, cutoff))
    }

    #[instrument(skip(self, writes), fields(write_count = writes.len()))]
    async fn execute_batch(&self, writes: Vec<LedgerWrite>, batch_size: usize) -> BatchOutcome {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["execute_batch"])
            .start_timer();

        let mut outcome = BatchOutcome::default();
        for (ordinal, chunk) in writes.chunks(batch_size.max(1)).enumerate() {
            match self.apply_chunk(chunk).await {
                Ok(receipts) => {
                    outcome.successful_batches += 1;
                    outcome.succeeded_ops += chunk.len();
                    outcome.rows_affected += receipts.rows_affected;
                    outcome.applied.extend(receipts.applied);
                    outcome.queued.extend(receipts.queued);
                }
                Err(error) => {
                    warn!(chunk = ordinal, error = %error, "Write chunk rolled back");
                    outcome.failed_batches += 1;
                    outcome.errors.push(format!("chunk {}: {}", ordinal, error));
                }
            }
        }

        timer.observe_duration();
        outcome
    }
}

fn is_transient(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
}
