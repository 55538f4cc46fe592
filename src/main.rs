//! Revenue Matcher entry point.
//!
//! Runs one matching pass end to end and prints the run report as JSON on
//! stdout. All knobs come from the environment; see `config` for the full
//! list.

use revenue_matcher::config::{env_flag, MatcherConfig};
use revenue_matcher::learning::NoopLearning;
use revenue_matcher::matching::RevenueMatcher;
use revenue_matcher::models::RunOptions;
use revenue_matcher::semantic::claude::{ClaudeConfig, ClaudeJudge};
use revenue_matcher::semantic::{NoopJudge, SemanticJudge};
use revenue_matcher::services::{init_metrics, Database, LedgerStore};

use std::sync::Arc;
use tokio::signal;

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Run options come from the environment like everything else:
/// `MATCHER_INVOICE_IDS` (comma separated), `MATCHER_AUTO_APPLY`, and
/// `MATCHER_LEARNING_ENABLED`.
fn run_options_from_env() -> RunOptions {
    let invoice_ids = std::env::var("MATCHER_INVOICE_IDS")
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|ids| !ids.is_empty());

    RunOptions {
        invoice_ids,
        auto_apply: env_flag("MATCHER_AUTO_APPLY", false),
        learning_enabled: env_flag("MATCHER_LEARNING_ENABLED", false),
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let mut config = MatcherConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    // Initialize tracing
    init_tracing(&config.log_level, config.log_json);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting revenue-matcher"
    );

    // Initialize metrics
    init_metrics();

    if config.semantic.enabled && config.semantic.api_key.is_empty() {
        tracing::warn!("Semantic review enabled without ANTHROPIC_API_KEY, disabling");
        config.semantic.enabled = false;
    }

    // Log configuration (mask sensitive values)
    tracing::info!(
        db_max_connections = config.database.max_connections,
        db_min_connections = config.database.min_connections,
        batch_size = config.matching.batch_size,
        write_batch_size = config.matching.write_batch_size,
        high_threshold = config.matching.high_threshold,
        medium_threshold = config.matching.medium_threshold,
        candidate_window_days = config.matching.candidate_window_days,
        semantic_enabled = config.semantic.enabled,
        semantic_model = %config.semantic.model,
        "Configuration loaded"
    );

    // Connect to storage and bring the schema up to date
    let database = Database::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to connect to database");
        std::io::Error::other(format!("Database error: {}", e))
    })?;

    database.run_migrations().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to run migrations");
        std::io::Error::other(format!("Migration error: {}", e))
    })?;

    // Wire the engine
    let store: Arc<dyn LedgerStore> = Arc::new(database);
    let judge: Arc<dyn SemanticJudge> = if config.semantic.enabled {
        Arc::new(ClaudeJudge::new(ClaudeConfig {
            api_key: config.semantic.api_key.clone(),
            model: config.semantic.model.clone(),
            timeout_secs: config.semantic.timeout_secs,
        }))
    } else {
        Arc::new(NoopJudge)
    };
    let matcher = RevenueMatcher::new(config, store, judge, Arc::new(NoopLearning));

    let options = run_options_from_env();

    tokio::select! {
        report = matcher.run(options) => {
            match serde_json::to_string_pretty(&report) {
                Ok(rendered) => println!("{}", rendered),
                Err(e) => tracing::error!(error = %e, "Failed to render run report"),
            }
            if !report.success {
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            tracing::warn!("Shutdown signal received before the run completed");
            std::process::exit(130);
        }
    }

    Ok(())
}
