//! Matching pipeline: scoring orchestration, ranking, and persistence.

pub mod committer;
pub mod engine;
pub mod evaluator;

pub use engine::RevenueMatcher;
pub use evaluator::MatchEvaluator;
