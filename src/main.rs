// =============================================================================
// Helios Arena: Main Entry Point
// =============================================================================
//
// The arena starts in Demo mode for safety: decisions come from the paper
// provider and fills are simulated locally. Switching to Live requires an
// explicit `execution_mode` in arena_config.json plus venue and LLM
// credentials in the environment.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod agents;
mod api;
mod app_state;
mod breakers;
mod config;
mod leaderboard;
mod ledger;
mod market;
mod news;
mod orchestrator;
mod portfolio;
mod scoring;
mod stream;
mod types;
mod venue;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::agents::provider::{HttpLlmProvider, LlmProvider, PaperProvider};
use crate::app_state::AppState;
use crate::config::{ArenaConfig, ExecutionMode};
use crate::news::{HttpNewsFeed, NewsFeed, NullNewsFeed};
use crate::orchestrator::TriggerOutcome;

const CONFIG_PATH: &str = "arena_config.json";
const ROSTER_PATH: &str = "agents.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║            Helios Arena — Starting Up                   ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = ArenaConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        ArenaConfig::default()
    });
    config.apply_env_overrides();

    // Override symbols from env if available.
    if let Ok(syms) = std::env::var("HELIOS_SYMBOLS") {
        let parsed: Vec<String> = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if !parsed.is_empty() {
            config.symbols = parsed;
        }
    }

    info!(
        symbols = ?config.symbols,
        execution_mode = %config.execution_mode,
        benchmark_version = %config.benchmark_version,
        "arena configured"
    );

    // ── 2. Providers ─────────────────────────────────────────────────────
    let provider: Arc<dyn LlmProvider> = match config.execution_mode {
        ExecutionMode::Demo => {
            info!("Demo mode: decisions come from the paper provider");
            Arc::new(PaperProvider)
        }
        ExecutionMode::Live => Arc::new(HttpLlmProvider::from_env()),
    };

    let news_feed: Arc<dyn NewsFeed> = match std::env::var("NEWS_API_URL") {
        Ok(url) if !url.trim().is_empty() => Arc::new(HttpNewsFeed::new(url)),
        _ => {
            info!("NEWS_API_URL unset, prompts will carry no headlines");
            Arc::new(NullNewsFeed)
        }
    };

    // ── 3. Build shared state ────────────────────────────────────────────
    let roster = config::load_roster(ROSTER_PATH);
    let state = AppState::new(config, roster, provider, news_feed);

    // ── 4. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr =
        std::env::var("HELIOS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let bind_addr_clone = bind_addr.clone();

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr_clone)
            .await
            .expect("Failed to bind API server");
        info!(addr = %bind_addr_clone, "API server listening");
        axum::serve(listener, app)
            .await
            .expect("API server failed");
    });

    // ── 5. Round scheduler loop ──────────────────────────────────────────
    let scheduler_state = state.clone();
    tokio::spawn(async move {
        // Give the market provider and any manual triggers a moment first.
        tokio::time::sleep(tokio::time::Duration::from_secs(10)).await;
        info!("round scheduler starting");

        let interval_secs = scheduler_state.config.read().round_interval_secs.max(5);
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;

            match scheduler_state.orchestrator.trigger().await {
                TriggerOutcome::Completed(round) => {
                    info!(
                        round_id = %round.round_id,
                        status = ?round.status,
                        consensus = %round.consensus,
                        "scheduled round finished"
                    );
                }
                TriggerOutcome::Busy { round_id } => {
                    // A manual trigger got there first; skip this tick.
                    info!(holder = %round_id, "scheduled round skipped, lock held");
                }
            }
        }
    });

    // ── 6. Outcome resolution loop ───────────────────────────────────────
    let resolver_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let resolved = resolver_state.resolve_due_outcomes().await;
            if resolved > 0 {
                info!(resolved, "outcome resolution pass complete");
            }
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    if let Err(e) = state.config.read().save(CONFIG_PATH) {
        error!(error = %e, "Failed to save arena config on shutdown");
    }

    info!("Helios Arena shut down complete.");
    Ok(())
}
