//! Integration tests for degraded storage conditions.

mod common;

use common::{basic_engine, date, engine, init_tracing, invoice, test_config, transaction};
use revenue_matcher::models::RunOptions;
use revenue_matcher::semantic::NoopJudge;
use revenue_matcher::services::InMemoryLedger;
use std::sync::Arc;

#[tokio::test]
async fn unhealthy_storage_aborts_the_run() {
    init_tracing();
    let store = Arc::new(InMemoryLedger::new());
    store
        .seed_invoice(invoice(
            "inv-1",
            "INV-2024-0001",
            "Acme Corp",
            "1000.00",
            date(2024, 3, 1),
        ))
        .await;
    store.set_unhealthy(true).await;

    let report = basic_engine(store.clone()).run(RunOptions::default()).await;

    assert!(!report.success);
    let error = report.error.expect("aborted runs carry an error");
    assert!(error.contains("health check failed"), "error {}", error);
    assert_eq!(report.stats.total_invoices_processed, 0);
    assert!(report.matches.is_empty());
    assert!(store.pending_rows().await.is_empty());
}

#[tokio::test]
async fn read_failures_degrade_to_an_empty_run() {
    init_tracing();
    let store = Arc::new(InMemoryLedger::new());
    store
        .seed_invoice(invoice(
            "inv-1",
            "INV-2024-0001",
            "Acme Corp",
            "1000.00",
            date(2024, 3, 1),
        ))
        .await;
    store
        .seed_transaction(transaction(
            "txn-1",
            "2024-03-01",
            "ACME CORP PAYMENT INV-2024-0001",
            "-1000.00",
        ))
        .await;
    store.set_fail_reads(true).await;

    let report = basic_engine(store.clone())
        .run(RunOptions {
            auto_apply: true,
            ..Default::default()
        })
        .await;

    assert!(report.success, "read failures degrade instead of aborting");
    assert_eq!(report.stats.total_invoices_processed, 0);
    assert_eq!(report.stats.total_matches_found, 0);
    assert_eq!(report.stats.errors_count, 2);
    assert!(store.invoice("inv-1").await.unwrap().is_unmatched());
}

#[tokio::test]
async fn failed_write_chunks_do_not_poison_the_rest() {
    init_tracing();
    let store = Arc::new(InMemoryLedger::new());
    store
        .seed_invoice(invoice(
            "inv-a",
            "INV-0101",
            "Acme Corp",
            "1000.00",
            date(2024, 3, 1),
        ))
        .await;
    store
        .seed_invoice(invoice(
            "inv-b",
            "INV-0102",
            "Borealis Labs",
            "2000.00",
            date(2024, 4, 1),
        ))
        .await;
    store
        .seed_invoice(invoice(
            "inv-c",
            "INV-0103",
            "Cygnus Freight",
            "3000.00",
            date(2024, 5, 1),
        ))
        .await;
    store
        .seed_transaction(transaction(
            "txn-a",
            "2024-03-03",
            "ACME CORP PAYMENT",
            "-960.00",
        ))
        .await;
    store
        .seed_transaction(transaction(
            "txn-b",
            "2024-04-03",
            "BOREALIS LABS PAYMENT",
            "-1920.00",
        ))
        .await;
    store
        .seed_transaction(transaction(
            "txn-c",
            "2024-05-03",
            "CYGNUS FREIGHT PAYMENT",
            "-2880.00",
        ))
        .await;
    // Invoices are processed newest first, so with one write per chunk the
    // failing second chunk carries inv-b's match.
    store.fail_chunk(1).await;

    let mut config = test_config();
    config.matching.write_batch_size = 1;
    let matcher = engine(store.clone(), Arc::new(NoopJudge), config);

    let report = matcher.run(RunOptions::default()).await;

    assert!(report.success);
    assert_eq!(report.stats.total_matches_found, 3);
    assert_eq!(report.stats.pending_review_matches, 2);
    assert_eq!(report.stats.errors_count, 1);

    let pending = store.pending_rows().await;
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().any(|row| row.invoice_id == "inv-a"));
    assert!(pending.iter().any(|row| row.invoice_id == "inv-c"));
    assert!(pending.iter().all(|row| row.invoice_id != "inv-b"));
}
