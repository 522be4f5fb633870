// =============================================================================
// Central Application State: Helios Arena engine
// =============================================================================
//
// The single aggregate every subsystem and HTTP handler hangs off. Built
// once in `main`, wrapped in `Arc`, and threaded by reference everywhere;
// nothing in the crate captures hidden module-level state, so tests build
// their own instance per test.
//
// Thread safety:
//   - parking_lot::RwLock around the hot-reloadable config.
//   - Arc wrappers for subsystem engines that manage their own interior
//     mutability.
//   - The agent roster is read-only after process init.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::agents::provider::LlmProvider;
use crate::agents::AgentRunner;
use crate::breakers::ExecutionStatsStore;
use crate::config::ArenaConfig;
use crate::ledger::ForensicLedger;
use crate::leaderboard::LeaderboardStore;
use crate::market::MarketDataProvider;
use crate::news::{NewsCache, NewsFeed};
use crate::orchestrator::{OrchestratorParts, RoundOrchestrator};
use crate::portfolio::FillStore;
use crate::scoring::ScoringEngine;
use crate::stream::TradeStreamBus;
use crate::types::{AgentConfig, TradeAction};
use crate::venue::client::VenueClient;
use crate::venue::rate_limit::RateLimitedRpc;

/// Central application state shared across all async tasks via `Arc`.
pub struct AppState {
    pub config: Arc<RwLock<ArenaConfig>>,
    pub roster: Arc<Vec<AgentConfig>>,

    pub ledger: Arc<ForensicLedger>,
    pub scoring: Arc<ScoringEngine>,
    pub leaderboard: Arc<LeaderboardStore>,
    pub stream: Arc<TradeStreamBus>,
    pub fills: Arc<FillStore>,
    pub exec_stats: Arc<ExecutionStatsStore>,
    pub market: Arc<MarketDataProvider>,
    pub rpc: Arc<RateLimitedRpc>,
    pub orchestrator: Arc<RoundOrchestrator>,

    /// Instant the engine started, for uptime reporting.
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire up every subsystem from the given config and roster.
    ///
    /// The LLM provider and news feed are injected so demo deployments and
    /// tests can run fully offline.
    pub fn new(
        config: ArenaConfig,
        roster: Vec<AgentConfig>,
        provider: Arc<dyn LlmProvider>,
        news_feed: Arc<dyn NewsFeed>,
    ) -> Arc<Self> {
        let venue = Arc::new(VenueClient::new(
            std::env::var("VENUE_API_KEY").unwrap_or_default(),
            std::env::var("VENUE_API_SECRET").unwrap_or_default(),
        ));
        let rpc = Arc::new(RateLimitedRpc::new(
            config.rate_limit_max,
            Duration::from_millis(config.rate_limit_window_ms),
            Duration::from_millis(config.t_rpc_ms),
        ));
        let market = Arc::new(MarketDataProvider::new(
            config.execution_mode,
            config.symbols.clone(),
            venue.clone(),
            rpc.clone(),
        ));

        let ledger = Arc::new(ForensicLedger::new(config.max_ledger_size));
        let scoring = Arc::new(ScoringEngine::new(config.max_decisions_per_agent));
        let leaderboard = Arc::new(LeaderboardStore::new());
        let stream = Arc::new(TradeStreamBus::new(config.max_events, config.catch_up_limit));
        let fills = Arc::new(FillStore::new(config.starting_cash));
        let exec_stats = Arc::new(ExecutionStatsStore::new(Duration::from_secs(
            config.velocity_window_secs,
        )));

        let roster = Arc::new(roster);
        let config = Arc::new(RwLock::new(config));

        let orchestrator = Arc::new(RoundOrchestrator::new(OrchestratorParts {
            config: config.clone(),
            roster: roster.clone(),
            runner: Arc::new(AgentRunner::new(provider)),
            market: market.clone(),
            news: Arc::new(NewsCache::new(news_feed)),
            ledger: ledger.clone(),
            scoring: scoring.clone(),
            leaderboard: leaderboard.clone(),
            stream: stream.clone(),
            fills: fills.clone(),
            exec_stats: exec_stats.clone(),
            venue,
            rpc: rpc.clone(),
        }));

        info!(
            agents = roster.len(),
            symbols = ?config.read().symbols,
            "arena state initialised"
        );

        Arc::new(Self {
            config,
            roster,
            ledger,
            scoring,
            leaderboard,
            stream,
            fills,
            exec_stats,
            market,
            rpc,
            orchestrator,
            start_time: std::time::Instant::now(),
        })
    }

    /// Agent lookup by stable id.
    pub fn agent(&self, agent_id: &str) -> Option<&AgentConfig> {
        self.roster.iter().find(|a| a.agent_id == agent_id)
    }

    // -------------------------------------------------------------------------
    // Outcome resolution
    // -------------------------------------------------------------------------

    /// Resolve every unresolved ledger entry older than the outcome horizon
    /// against live prices. Returns how many entries were resolved.
    ///
    /// Resolution is idempotent at the ledger: a second pass over the same
    /// entry is a no-op and feeds nothing downstream.
    pub async fn resolve_due_outcomes(&self) -> usize {
        let horizon = self.config.read().outcome_horizon_secs;
        let pending = self.ledger.unresolved_entries(horizon);
        if pending.is_empty() {
            return 0;
        }

        let mut resolved = 0;
        for entry in pending {
            let price = match self.market.current_price(&entry.symbol).await {
                Ok(p) if p > 0.0 => p,
                Ok(_) | Err(_) => {
                    debug!(symbol = %entry.symbol, "price unavailable, outcome deferred");
                    continue;
                }
            };
            if entry.price_at_trade <= 0.0 {
                warn!(entry_id = %entry.entry_id, "entry lacks a trade price, skipping");
                continue;
            }

            let direction = match entry.action {
                TradeAction::Buy => 1.0,
                TradeAction::Sell => -1.0,
                TradeAction::Hold => continue,
            };
            let pnl_percent =
                (price - entry.price_at_trade) / entry.price_at_trade * 100.0 * direction;
            let correct = pnl_percent > 0.0;

            if self
                .ledger
                .resolve_outcome(&entry.entry_id, pnl_percent, correct)
            {
                self.scoring.record_outcome(
                    &entry.agent_id,
                    &entry.symbol,
                    entry.confidence,
                    correct,
                    pnl_percent,
                );
                self.leaderboard
                    .on_outcome(&entry.agent_id, pnl_percent, correct);
                self.exec_stats.record_outcome(&entry.agent_id, pnl_percent);
                resolved += 1;
            }
        }

        if resolved > 0 {
            info!(resolved, "ledger outcomes resolved");
        }
        resolved
    }

    // -------------------------------------------------------------------------
    // Health snapshot
    // -------------------------------------------------------------------------

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: "ok",
            benchmark_version: self.config.read().benchmark_version.clone(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            ledger_entries: self.ledger.len(),
            stream_events: self.stream.ring_len(),
            agents: self.roster.len(),
            server_time: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Liveness payload for the health endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub benchmark_version: String,
    pub uptime_secs: u64,
    pub ledger_entries: usize,
    pub stream_events: usize,
    pub agents: usize,
    pub server_time: i64,
}

// =============================================================================
// Tests
// =============================================================================
