//! Configuration for revenue-matcher.
//!
//! Everything is read from the environment with sane defaults; only
//! `DATABASE_URL` is required. `from_env` validates the combination before
//! the engine sees it, so invalid threshold or weight setups fail at
//! startup instead of silently skewing a run.

use crate::error::MatcherError;
use crate::models::CriteriaScores;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct MatcherConfig {
    pub log_level: String,
    pub log_json: bool,
    pub database: DatabaseConfig,
    pub matching: MatchingConfig,
    pub semantic: SemanticConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Knobs for the scoring and batching pipeline.
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    /// Scores at or above this are high confidence and eligible for
    /// auto-apply.
    pub high_threshold: f64,
    /// Review floor; pairs scoring below this are dropped entirely. Tunable
    /// down for triage sweeps over messy ledgers.
    pub medium_threshold: f64,
    pub weights: ScoreWeights,
    /// Invoices per processing batch.
    pub batch_size: usize,
    /// Writes per persistence transaction.
    pub write_batch_size: usize,
    /// How far back candidate transactions are pulled from.
    pub candidate_window_days: i64,
    /// Matches retained per invoice after ranking.
    pub max_matches_per_invoice: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.90,
            medium_threshold: 0.50,
            weights: ScoreWeights::default(),
            batch_size: 50,
            write_batch_size: 25,
            candidate_window_days: 180,
            max_matches_per_invoice: 5,
        }
    }
}

/// Relative weight of each criterion in the final score. The defaults are
/// product constants; `validate` insists they stay a convex combination.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub amount: f64,
    pub date: f64,
    pub vendor: f64,
    pub entity: f64,
    pub pattern: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            amount: 0.35,
            date: 0.20,
            vendor: 0.25,
            entity: 0.10,
            pattern: 0.10,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.amount + self.date + self.vendor + self.entity + self.pattern
    }

    /// Weighted combination of a full criteria score set.
    pub fn weighted_sum(&self, scores: &CriteriaScores) -> f64 {
        self.amount * scores.amount
            + self.date * scores.date
            + self.vendor * scores.vendor
            + self.entity * scores.entity
            + self.pattern * scores.pattern
    }
}

/// Semantic review stage configuration.
#[derive(Debug, Clone)]
pub struct SemanticConfig {
    pub enabled: bool,
    pub api_key: String,
    pub model: String,
    /// Matches scoring in `[window_low, window_high)` are sent for review.
    pub window_low: f64,
    pub window_high: f64,
    /// Matches per review request.
    pub review_batch_size: usize,
    /// Pause after this many reviewed matches.
    pub pace_every: usize,
    pub pace_delay_ms: u64,
    /// Verdicts below this confidence are ignored.
    pub min_confidence: f64,
    pub timeout_secs: u64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            model: "claude-3-5-sonnet-20241022".to_string(),
            window_low: 0.70,
            window_high: 0.85,
            review_batch_size: 3,
            pace_every: 10,
            pace_delay_ms: 2000,
            min_confidence: 0.7,
            timeout_secs: 30,
        }
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 10,
                min_connections: 2,
            },
            matching: MatchingConfig::default(),
            semantic: SemanticConfig::default(),
        }
    }
}

impl MatcherConfig {
    pub fn from_env() -> Result<Self, MatcherError> {
        let defaults = MatcherConfig::default();

        let config = Self {
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_json: env_flag("LOG_JSON", defaults.log_json),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    MatcherError::Config(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                ),
                min_connections: env_parse(
                    "DATABASE_MIN_CONNECTIONS",
                    defaults.database.min_connections,
                ),
            },
            matching: MatchingConfig {
                high_threshold: env_parse(
                    "MATCHER_HIGH_THRESHOLD",
                    defaults.matching.high_threshold,
                ),
                medium_threshold: env_parse(
                    "MATCHER_MEDIUM_THRESHOLD",
                    defaults.matching.medium_threshold,
                ),
                weights: ScoreWeights::default(),
                batch_size: env_parse("MATCHER_BATCH_SIZE", defaults.matching.batch_size),
                write_batch_size: env_parse(
                    "MATCHER_WRITE_BATCH_SIZE",
                    defaults.matching.write_batch_size,
                ),
                candidate_window_days: env_parse(
                    "MATCHER_CANDIDATE_WINDOW_DAYS",
                    defaults.matching.candidate_window_days,
                ),
                max_matches_per_invoice: env_parse(
                    "MATCHER_MAX_MATCHES_PER_INVOICE",
                    defaults.matching.max_matches_per_invoice,
                ),
            },
            semantic: SemanticConfig {
                enabled: env_flag("SEMANTIC_REVIEW_ENABLED", defaults.semantic.enabled),
                api_key: env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
                model: env::var("SEMANTIC_MODEL").unwrap_or(defaults.semantic.model),
                window_low: env_parse("SEMANTIC_WINDOW_LOW", defaults.semantic.window_low),
                window_high: env_parse("SEMANTIC_WINDOW_HIGH", defaults.semantic.window_high),
                review_batch_size: env_parse(
                    "SEMANTIC_REVIEW_BATCH_SIZE",
                    defaults.semantic.review_batch_size,
                ),
                pace_every: env_parse("SEMANTIC_PACE_EVERY", defaults.semantic.pace_every),
                pace_delay_ms: env_parse(
                    "SEMANTIC_PACE_DELAY_MS",
                    defaults.semantic.pace_delay_ms,
                ),
                min_confidence: env_parse(
                    "SEMANTIC_MIN_CONFIDENCE",
                    defaults.semantic.min_confidence,
                ),
                timeout_secs: env_parse("SEMANTIC_TIMEOUT_SECS", defaults.semantic.timeout_secs),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run sensibly with.
    pub fn validate(&self) -> Result<(), MatcherError> {
        let m = &self.matching;

        if !(0.0..=1.0).contains(&m.high_threshold) || m.high_threshold <= 0.0 {
            return Err(config_error("MATCHER_HIGH_THRESHOLD must be in (0.0, 1.0]"));
        }
        if m.medium_threshold <= 0.0 || m.medium_threshold >= m.high_threshold {
            return Err(config_error(
                "MATCHER_MEDIUM_THRESHOLD must be in (0.0, MATCHER_HIGH_THRESHOLD)",
            ));
        }

        let w = &m.weights;
        let components = [w.amount, w.date, w.vendor, w.entity, w.pattern];
        if components.iter().any(|c| *c < 0.0) {
            return Err(config_error("criterion weights must be non-negative"));
        }
        if (w.sum() - 1.0).abs() > 1e-6 {
            return Err(config_error("criterion weights must sum to 1.0"));
        }

        if m.batch_size == 0 || m.write_batch_size == 0 || m.max_matches_per_invoice == 0 {
            return Err(config_error("batch sizes and match cap must be at least 1"));
        }
        if m.candidate_window_days < 1 {
            return Err(config_error(
                "MATCHER_CANDIDATE_WINDOW_DAYS must be at least 1",
            ));
        }

        let s = &self.semantic;
        if !(0.0..=1.0).contains(&s.window_low)
            || !(0.0..=1.0).contains(&s.window_high)
            || s.window_low >= s.window_high
        {
            return Err(config_error(
                "semantic review window must satisfy 0.0 <= low < high <= 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&s.min_confidence) {
            return Err(config_error("SEMANTIC_MIN_CONFIDENCE must be in [0.0, 1.0]"));
        }
        if s.review_batch_size == 0 || s.pace_every == 0 {
            return Err(config_error(
                "SEMANTIC_REVIEW_BATCH_SIZE and SEMANTIC_PACE_EVERY must be at least 1",
            ));
        }

        Ok(())
    }
}

fn config_error(message: &str) -> MatcherError {
    MatcherError::Config(anyhow::anyhow!("{}", message))
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Read a boolean flag from the environment. A set variable counts as true
/// only for the usual truthy spellings; an unset one falls back to the
/// default.
pub fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
