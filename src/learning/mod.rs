//! Learning adapter seam.
//!
//! The engine can route criterion scores through an adapter that nudges
//! them based on accumulated reviewer feedback, and reports every decision
//! back to it. The adapter is strictly advisory: adjusted scores are
//! clamped before use, any adjustment error falls back to the raw scores,
//! and feedback recording is fire-and-forget.

use crate::models::{CriteriaScores, Invoice, LedgerTransaction, MatchFeedback};
use async_trait::async_trait;

#[async_trait]
pub trait LearningAdapter: Send + Sync {
    /// Return adjusted criterion scores for this pair. Implementations may
    /// return values outside `[0.0, 1.0]`; the engine clamps them.
    async fn adjust(
        &self,
        scores: &CriteriaScores,
        invoice: &Invoice,
        transaction: &LedgerTransaction,
    ) -> anyhow::Result<CriteriaScores>;

    /// Record the outcome of a match decision.
    async fn record_feedback(&self, feedback: MatchFeedback) -> anyhow::Result<()>;
}

/// Adapter that changes nothing and remembers nothing. Wired when no
/// learning backend is configured.
pub struct NoopLearning;

#[async_trait]
impl LearningAdapter for NoopLearning {
    async fn adjust(
        &self,
        scores: &CriteriaScores,
        _invoice: &Invoice,
        _transaction: &LedgerTransaction,
    ) -> anyhow::Result<CriteriaScores> {
        Ok(*scores)
    }

    async fn record_feedback(&self, _feedback: MatchFeedback) -> anyhow::Result<()> {
        Ok(())
    }
}
