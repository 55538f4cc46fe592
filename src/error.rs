//! Error types for revenue-matcher.

use thiserror::Error;

/// Errors surfaced by storage and configuration.
///
/// Most failures inside a matching run are absorbed and reported through
/// [`crate::models::RunReport`] rather than propagated, so this enum stays
/// deliberately small: it covers the places where a caller can actually do
/// something different depending on what went wrong.
#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("Configuration error: {0}")]
    Config(#[source] anyhow::Error),

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl From<sqlx::Error> for MatcherError {
    fn from(err: sqlx::Error) -> Self {
        MatcherError::Storage(anyhow::Error::new(err))
    }
}
