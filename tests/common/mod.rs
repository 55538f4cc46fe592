//! Common test utilities for revenue-matcher integration tests.
//!
//! All engine tests run against the in-memory store, so no database or
//! network is needed.

use chrono::NaiveDate;
use revenue_matcher::config::MatcherConfig;
use revenue_matcher::learning::NoopLearning;
use revenue_matcher::matching::RevenueMatcher;
use revenue_matcher::models::{Invoice, LedgerTransaction};
use revenue_matcher::semantic::{NoopJudge, SemanticJudge};
use revenue_matcher::services::InMemoryLedger;
use std::sync::{Arc, Once};

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,revenue_matcher=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Default config for hermetic tests. The candidate window is widened so
/// fixtures can use fixed calendar dates, and semantic pacing is disabled
/// to keep tests fast.
pub fn test_config() -> MatcherConfig {
    let mut config = MatcherConfig::default();
    config.matching.candidate_window_days = 365 * 100;
    config.semantic.pace_delay_ms = 0;
    config
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid test date")
}

/// Invoice fixture: issued two weeks before due, unlinked, in USD.
pub fn invoice(id: &str, number: &str, vendor: &str, amount: &str, due: NaiveDate) -> Invoice {
    Invoice {
        id: id.to_string(),
        invoice_number: number.to_string(),
        vendor_name: vendor.to_string(),
        total_amount: amount.parse().expect("valid test amount"),
        currency: "USD".to_string(),
        issue_date: due - chrono::Duration::days(14),
        due_date: Some(due),
        business_unit: String::new(),
        status: "sent".to_string(),
        linked_transaction_id: None,
    }
}

pub fn transaction(id: &str, date: &str, description: &str, amount: &str) -> LedgerTransaction {
    LedgerTransaction {
        transaction_id: id.to_string(),
        date: date.to_string(),
        description: description.to_string(),
        amount: amount.parse().expect("valid test amount"),
        currency: "USD".to_string(),
        classified_entity: None,
    }
}

/// Engine wired to an in-memory store with no learning backend.
#[allow(dead_code)]
pub fn engine(
    store: Arc<InMemoryLedger>,
    judge: Arc<dyn SemanticJudge>,
    config: MatcherConfig,
) -> RevenueMatcher {
    RevenueMatcher::new(config, store, judge, Arc::new(NoopLearning))
}

/// Engine with the default hermetic config and no semantic review.
#[allow(dead_code)]
pub fn basic_engine(store: Arc<InMemoryLedger>) -> RevenueMatcher {
    engine(store, Arc::new(NoopJudge), test_config())
}
