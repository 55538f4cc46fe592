//! Domain models for revenue-matcher.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Matching criteria
// ============================================================================

/// The five criteria every invoice/transaction pair is scored on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    Amount,
    Date,
    Vendor,
    Entity,
    Pattern,
}

impl Criterion {
    /// Fixed criterion order, also used to break ties when picking the
    /// dominant criterion for a match type.
    pub const ALL: [Criterion; 5] = [
        Criterion::Amount,
        Criterion::Date,
        Criterion::Vendor,
        Criterion::Entity,
        Criterion::Pattern,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Criterion::Amount => "amount",
            Criterion::Date => "date",
            Criterion::Vendor => "vendor",
            Criterion::Entity => "entity",
            Criterion::Pattern => "pattern",
        }
    }
}

/// Per-criterion similarity scores, each in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriteriaScores {
    pub amount: f64,
    pub date: f64,
    pub vendor: f64,
    pub entity: f64,
    pub pattern: f64,
}

impl CriteriaScores {
    pub fn get(&self, criterion: Criterion) -> f64 {
        match criterion {
            Criterion::Amount => self.amount,
            Criterion::Date => self.date,
            Criterion::Vendor => self.vendor,
            Criterion::Entity => self.entity,
            Criterion::Pattern => self.pattern,
        }
    }

    /// Clamp every component into `[0.0, 1.0]`. Applied to adjusted scores
    /// coming back from a learning adapter, which is not trusted to stay in
    /// range. Non-finite values collapse to `0.0`.
    pub fn clamped(&self) -> Self {
        fn clamp(value: f64) -> f64 {
            if value.is_finite() {
                value.clamp(0.0, 1.0)
            } else {
                0.0
            }
        }

        Self {
            amount: clamp(self.amount),
            date: clamp(self.date),
            vendor: clamp(self.vendor),
            entity: clamp(self.entity),
            pattern: clamp(self.pattern),
        }
    }

    pub fn is_bounded(&self) -> bool {
        Criterion::ALL
            .iter()
            .all(|c| (0.0..=1.0).contains(&self.get(*c)))
    }
}

// ============================================================================
// Confidence
// ============================================================================

/// Confidence band derived from the final weighted score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
        }
    }
}

// ============================================================================
// Ledger entities
// ============================================================================

/// Customer invoice as read from storage.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Invoice {
    pub id: String,
    pub invoice_number: String,
    pub vendor_name: String,
    pub total_amount: Decimal,
    pub currency: String,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    /// Business unit the invoice was issued under; empty when unknown.
    pub business_unit: String,
    pub status: String,
    /// Set once a transaction has been applied to this invoice.
    pub linked_transaction_id: Option<String>,
}

impl Invoice {
    /// An invoice is a candidate for matching until a transaction id has
    /// been applied to it.
    pub fn is_unmatched(&self) -> bool {
        self.linked_transaction_id
            .as_deref()
            .map_or(true, |id| id.is_empty())
    }

    /// The date payments are expected against: due date when present,
    /// otherwise the issue date.
    pub fn target_date(&self) -> NaiveDate {
        self.due_date.unwrap_or(self.issue_date)
    }
}

/// Bank ledger transaction as read from storage.
///
/// The date is kept as raw text because upstream export pipelines disagree
/// on format; parse it with [`crate::utils::dates::parse_flexible`].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerTransaction {
    pub transaction_id: String,
    pub date: String,
    pub description: String,
    pub amount: Decimal,
    pub currency: String,
    /// Entity label produced by upstream classification, when available.
    pub classified_entity: Option<String>,
}

// ============================================================================
// Match results
// ============================================================================

/// One scored invoice/transaction pairing produced by the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub invoice_id: String,
    pub transaction_id: String,
    /// Final weighted score in `[0.0, 1.0]` (capped at 0.95 after an AI
    /// confirmation).
    pub score: f64,
    /// Dominant criterion name, possibly suffixed by the semantic review
    /// with `_ai_enhanced` or `_ai_rejected`.
    pub match_type: String,
    pub criteria_scores: CriteriaScores,
    pub confidence: ConfidenceLevel,
    pub auto_match: bool,
    pub explanation: String,
}

/// Payload for linking a transaction onto an invoice.
#[derive(Debug, Clone)]
pub struct MatchApplication {
    pub invoice_id: String,
    pub transaction_id: String,
    pub score: f64,
    pub match_type: String,
}

impl MatchApplication {
    pub fn from_result(result: &MatchResult) -> Self {
        Self {
            invoice_id: result.invoice_id.clone(),
            transaction_id: result.transaction_id.clone(),
            score: result.score,
            match_type: result.match_type.clone(),
        }
    }
}

/// A match queued for human review.
#[derive(Debug, Clone)]
pub struct PendingReviewMatch {
    pub id: Uuid,
    pub invoice_id: String,
    pub transaction_id: String,
    pub score: f64,
    pub match_type: String,
    pub criteria_scores: CriteriaScores,
    pub confidence: ConfidenceLevel,
    pub explanation: String,
    pub created_utc: DateTime<Utc>,
}

impl PendingReviewMatch {
    pub fn from_result(result: &MatchResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            invoice_id: result.invoice_id.clone(),
            transaction_id: result.transaction_id.clone(),
            score: result.score,
            match_type: result.match_type.clone(),
            criteria_scores: result.criteria_scores,
            confidence: result.confidence,
            explanation: result.explanation.clone(),
            created_utc: Utc::now(),
        }
    }
}

// ============================================================================
// Audit trail
// ============================================================================

/// What happened to a match, recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    AutoApplied,
    AiEnhanced,
    AiRejected,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AutoApplied => "auto_applied",
            AuditAction::AiEnhanced => "ai_enhanced",
            AuditAction::AiRejected => "ai_rejected",
        }
    }
}

/// Append-only audit log entry.
#[derive(Debug, Clone)]
pub struct MatchAuditEntry {
    pub id: Uuid,
    pub invoice_id: String,
    pub transaction_id: String,
    pub action: AuditAction,
    pub score: f64,
    pub match_type: String,
    pub actor: String,
    pub created_utc: DateTime<Utc>,
}

impl MatchAuditEntry {
    pub fn new(result: &MatchResult, action: AuditAction, actor: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            invoice_id: result.invoice_id.clone(),
            transaction_id: result.transaction_id.clone(),
            action,
            score: result.score,
            match_type: result.match_type.clone(),
            actor: actor.to_string(),
            created_utc: Utc::now(),
        }
    }
}

// ============================================================================
// Learning feedback
// ============================================================================

/// Outcome of a match decision, handed to the learning adapter.
#[derive(Debug, Clone)]
pub struct MatchFeedback {
    pub invoice_id: String,
    pub transaction_id: String,
    pub criteria_scores: CriteriaScores,
    pub score: f64,
    pub accepted: bool,
    pub actor: String,
}

// ============================================================================
// Run reporting
// ============================================================================

/// Caller-supplied knobs for a single matching run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Restrict the run to these invoice ids; `None` means every unmatched
    /// invoice.
    pub invoice_ids: Option<Vec<String>>,
    /// Apply high-confidence matches to the ledger instead of queueing them
    /// for review.
    pub auto_apply: bool,
    /// Route criterion scores through the learning adapter.
    pub learning_enabled: bool,
}

/// Per-batch outcome, one entry per processed invoice batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStats {
    pub batch_index: usize,
    pub invoice_count: usize,
    pub matches_found: usize,
    pub error: Option<String>,
}

/// Aggregate counters for a matching run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub total_invoices_processed: usize,
    pub total_matches_found: usize,
    pub high_confidence_matches: usize,
    pub medium_confidence_matches: usize,
    pub auto_applied_matches: usize,
    pub pending_review_matches: usize,
    pub errors_count: usize,
    pub processing_time_seconds: f64,
    pub batch_stats: Vec<BatchStats>,
}

/// Human-readable summary of one match, denormalized for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MatchSummary {
    pub invoice_id: String,
    pub invoice_number: String,
    pub vendor_name: String,
    pub invoice_amount: Decimal,
    pub transaction_id: String,
    pub transaction_description: String,
    pub transaction_amount: Decimal,
    pub transaction_date: String,
    pub score: f64,
    pub match_type: String,
    pub confidence: ConfidenceLevel,
    pub auto_match: bool,
    pub explanation: String,
}

/// Final report returned by a matching run. `success` is false only when
/// the run aborted before matching started (failed health check); every
/// other failure is absorbed into `stats.errors_count`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub error: Option<String>,
    pub stats: RunStats,
    pub matches: Vec<MatchSummary>,
}

impl RunReport {
    /// Report for a run that aborted before any matching work happened.
    pub fn aborted(error: String, stats: RunStats) -> Self {
        Self {
            success: false,
            error: Some(error),
            stats,
            matches: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_levels_serialize_lowercase() {
        assert_eq!(ConfidenceLevel::High.as_str(), "high");
        assert_eq!(
            serde_json::to_string(&ConfidenceLevel::Medium).unwrap(),
            "\"medium\""
        );
    }

    #[test]
    fn clamping_normalizes_out_of_range_scores() {
        let scores = CriteriaScores {
            amount: 1.7,
            date: -0.2,
            vendor: f64::NAN,
            entity: 0.5,
            pattern: f64::INFINITY,
        };
        let clamped = scores.clamped();
        assert_eq!(clamped.amount, 1.0);
        assert_eq!(clamped.date, 0.0);
        assert_eq!(clamped.vendor, 0.0);
        assert_eq!(clamped.entity, 0.5);
        assert_eq!(clamped.pattern, 0.0);
        assert!(clamped.is_bounded());
    }

    #[test]
    fn invoice_with_empty_link_counts_as_unmatched() {
        let invoice = Invoice {
            id: "inv-1".to_string(),
            invoice_number: "INV-1001".to_string(),
            vendor_name: "Acme Corp".to_string(),
            total_amount: Decimal::new(100000, 2),
            currency: "USD".to_string(),
            issue_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            due_date: None,
            business_unit: "Ops".to_string(),
            status: "sent".to_string(),
            linked_transaction_id: Some(String::new()),
        };
        assert!(invoice.is_unmatched());
        assert_eq!(invoice.target_date(), invoice.issue_date);
    }
}
