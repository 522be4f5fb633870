// =============================================================================
// Round Orchestrator: the single-writer scheduler behind every round
// =============================================================================
//
// One round at a time, process-wide. `trigger` try-acquires the global
// trading lock and returns `Busy` immediately when a round is in flight; it
// never queues. A held lock is released on every exit path because the
// owned guard lives on the trigger stack.
//
// Round phases:
//
//   capture market -> fan out agents -> gate + execute -> record
//
// Agent failures never cross the agent boundary (they degrade to holds), and
// round failures never prevent lock release. A best-effort cancellation flag
// is observed between phases; cancelled work still flows through the record
// phase so the ledger never sees a torn round.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::{AgentRunner, CallBudget};
use crate::breakers::{self, CircuitBreakerActivation, ExecutionStatsStore};
use crate::config::{ArenaConfig, ExecutionMode};
use crate::ledger::{self, EntryDraft, ForensicLedger};
use crate::leaderboard::LeaderboardStore;
use crate::market::MarketDataProvider;
use crate::news::NewsCache;
use crate::portfolio::{Fill, FillStore};
use crate::scoring::ScoringEngine;
use crate::stream::{payload as stream_payload, TradeStreamBus};
use crate::types::{
    AgentConfig, EventKind, ExecutionDetails, ExecutionOutcome, MarketSnapshot, TradeAction,
    TradingDecision,
};
use crate::venue::client::VenueClient;
use crate::venue::rate_limit::RateLimitedRpc;

/// Triggered rounds retained for the history endpoint, newest first.
const HISTORY_CAP: usize = 100;

// ---------------------------------------------------------------------------
// Public round types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Per-agent outcome inside a completed round.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundDecisionRecord {
    pub agent_id: String,
    pub action: TradeAction,
    pub symbol: String,
    pub quantity: f64,
    pub confidence: f64,
    pub allowed: bool,
    pub executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_error: Option<String>,
    pub breaker_activations: Vec<CircuitBreakerActivation>,
    pub entry_id: String,
    pub composite_score: f64,
}

/// The document returned by the trigger endpoint and kept in history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggeredRound {
    pub round_id: String,
    pub status: RoundStatus,
    pub started_at: String,
    pub completed_at: String,
    pub consensus: String,
    pub decisions: Vec<RoundDecisionRecord>,
    pub errors: Vec<String>,
}

/// Outcome of a trigger attempt.
#[derive(Debug, Clone)]
pub enum TriggerOutcome {
    Completed(TriggeredRound),
    /// A round is in flight; carries the holder's round id.
    Busy { round_id: String },
}

/// Lock + last-round summary for the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_round: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_round: Option<TriggeredRound>,
    pub rounds_run: u64,
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Everything the orchestrator drives, built once at process start.
pub struct OrchestratorParts {
    pub config: Arc<RwLock<ArenaConfig>>,
    pub roster: Arc<Vec<AgentConfig>>,
    pub runner: Arc<AgentRunner>,
    pub market: Arc<MarketDataProvider>,
    pub news: Arc<NewsCache>,
    pub ledger: Arc<ForensicLedger>,
    pub scoring: Arc<ScoringEngine>,
    pub leaderboard: Arc<LeaderboardStore>,
    pub stream: Arc<TradeStreamBus>,
    pub fills: Arc<FillStore>,
    pub exec_stats: Arc<ExecutionStatsStore>,
    pub venue: Arc<VenueClient>,
    pub rpc: Arc<RateLimitedRpc>,
}

pub struct RoundOrchestrator {
    parts: OrchestratorParts,
    lock: Arc<tokio::sync::Mutex<()>>,
    current_round: RwLock<Option<String>>,
    history: RwLock<Vec<TriggeredRound>>,
    rounds_run: std::sync::atomic::AtomicU64,
    cancel_requested: AtomicBool,
}

struct AgentRoundState {
    decision: TradingDecision,
    allowed: bool,
    activations: Vec<CircuitBreakerActivation>,
    execution: ExecutionOutcome,
}

impl RoundOrchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        Self {
            parts,
            lock: Arc::new(tokio::sync::Mutex::new(())),
            current_round: RwLock::new(None),
            history: RwLock::new(Vec::new()),
            rounds_run: std::sync::atomic::AtomicU64::new(0),
            cancel_requested: AtomicBool::new(false),
        }
    }

    // -------------------------------------------------------------------------
    // Triggering
    // -------------------------------------------------------------------------

    /// Run one round if the global trading lock is free.
    ///
    /// Returns `Busy` immediately when another round holds the lock; the
    /// caller is never queued.
    pub async fn trigger(&self) -> TriggerOutcome {
        let Ok(_guard) = self.lock.clone().try_lock_owned() else {
            let round_id = self.current_round.read().clone().unwrap_or_default();
            info!(holder = %round_id, "round trigger rejected: lock held");
            return TriggerOutcome::Busy { round_id };
        };

        let round_id = format!("round-{}", Uuid::new_v4());
        *self.current_round.write() = Some(round_id.clone());
        self.cancel_requested.store(false, Ordering::SeqCst);

        info!(round_id = %round_id, "round started");
        let round = self.run_round(round_id.clone()).await;

        *self.current_round.write() = None;
        self.rounds_run.fetch_add(1, Ordering::Relaxed);
        {
            let mut history = self.history.write();
            history.insert(0, round.clone());
            history.truncate(HISTORY_CAP);
        }

        info!(
            round_id = %round_id,
            status = ?round.status,
            consensus = %round.consensus,
            decisions = round.decisions.len(),
            "round finished"
        );

        // `_guard` drops here, releasing the trading lock on every path.
        TriggerOutcome::Completed(round)
    }

    /// Request best-effort cancellation of the in-flight round.
    pub fn cancel_current(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            locked: self.current_round.read().is_some(),
            current_round: self.current_round.read().clone(),
            last_round: self.history.read().first().cloned(),
            rounds_run: self.rounds_run.load(Ordering::Relaxed),
        }
    }

    /// Recent triggered rounds, newest first.
    pub fn history(&self, limit: usize) -> Vec<TriggeredRound> {
        self.history.read().iter().take(limit).cloned().collect()
    }

    fn cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Round pipeline
    // -------------------------------------------------------------------------

    async fn run_round(&self, round_id: String) -> TriggeredRound {
        let started_at = chrono::Utc::now().to_rfc3339();
        let config = self.parts.config.read().clone();
        let roster = self.parts.roster.clone();
        let mut errors = Vec::new();

        // ── Capture market ──────────────────────────────────────────────
        let snapshot = match self.parts.market.snapshot().await {
            Ok(s) => s,
            Err(e) => {
                warn!(round_id = %round_id, error = %e, "market snapshot failed, round aborted");
                errors.push(format!("market snapshot failed: {e:#}"));
                return TriggeredRound {
                    round_id,
                    status: RoundStatus::Failed,
                    started_at,
                    completed_at: chrono::Utc::now().to_rfc3339(),
                    consensus: "no_trades".to_string(),
                    decisions: Vec::new(),
                    errors,
                };
            }
        };
        let snapshot_hash = ledger::snapshot_hash(&snapshot);

        self.parts.stream.publish(
            EventKind::RoundStarted,
            None,
            &stream_payload::RoundStarted {
                round_id: round_id.clone(),
                symbols: snapshot.symbols(),
                captured_at: snapshot.captured_at.clone(),
            },
        );

        // News is best-effort; an empty block never stops the round.
        let news = self.parts.news.get_cached_news(&config.symbols).await;
        let news_block = NewsCache::format_news_for_prompt(&news);

        // Portfolios are computed once and shared by fan-out and gating.
        let portfolios: HashMap<String, _> = roster
            .iter()
            .map(|a| {
                (
                    a.agent_id.clone(),
                    self.parts.fills.portfolio_for(&a.agent_id, &snapshot),
                )
            })
            .collect();

        // Velocity/loss-streak gating also sees each agent's current-round
        // drawdown.
        for (agent_id, portfolio) in &portfolios {
            self.parts
                .exec_stats
                .set_round_drawdown(agent_id, (-portfolio.total_pnl_percent).max(0.0));
        }

        // ── Fan out ─────────────────────────────────────────────────────
        let mut decisions = if self.cancelled() {
            roster
                .iter()
                .map(|a| {
                    (
                        a.agent_id.clone(),
                        TradingDecision::hold(
                            self.fallback_symbol(a, &snapshot),
                            "cancelled before fan-out",
                        ),
                    )
                })
                .collect()
        } else {
            self.fan_out(&config, &roster, &snapshot, &portfolios, &news_block)
                .await
        };

        // ── Gate and execute ────────────────────────────────────────────
        let cancelled_before_execution = self.cancelled();
        let mut states: Vec<(AgentConfig, AgentRoundState)> = Vec::with_capacity(roster.len());

        for agent in roster.iter() {
            let proposed = decisions
                .remove(&agent.agent_id)
                .unwrap_or_else(|| {
                    TradingDecision::hold(
                        self.fallback_symbol(agent, &snapshot),
                        "no decision produced",
                    )
                });

            let portfolio = &portfolios[&agent.agent_id];
            let stats = self.parts.exec_stats.stats_for(&agent.agent_id);
            let verdict = breakers::evaluate(&proposed, portfolio, &stats, &config);

            for activation in &verdict.activations {
                self.parts.stream.publish(
                    EventKind::CircuitBreaker,
                    Some(agent.agent_id.clone()),
                    &stream_payload::CircuitBreaker {
                        round_id: round_id.clone(),
                        activation: activation.clone(),
                    },
                );
            }

            let mut decision = verdict.decision;

            let execution = if verdict.allowed && !decision.action.is_hold() {
                // Stats evolve for every allowed non-hold decision, whether
                // or not the venue call goes through.
                self.parts.exec_stats.record_trade_execution(&agent.agent_id);

                if cancelled_before_execution {
                    // Cancellation converts pending agents to holds; the
                    // record phase still runs over the converted decision.
                    decision = TradingDecision::hold(
                        decision.symbol.clone(),
                        "cancelled before execution",
                    );
                    ExecutionOutcome::skipped()
                } else {
                    self.execute_decision(&config, agent, &decision, &snapshot)
                        .await
                }
            } else {
                ExecutionOutcome::skipped()
            };

            if let Some(err) = &execution.execution_error {
                errors.push(format!("{}: {}", agent.agent_id, err));
            }

            states.push((
                agent.clone(),
                AgentRoundState {
                    decision,
                    allowed: verdict.allowed,
                    activations: verdict.activations,
                    execution,
                },
            ));
        }

        // ── Record ──────────────────────────────────────────────────────
        let records = self
            .record_round(&round_id, &config, &snapshot, &snapshot_hash, &states)
            .await;

        let consensus = classify_consensus(states.iter().map(|(_, s)| &s.decision));

        self.parts.stream.publish(
            EventKind::RoundCompleted,
            None,
            &stream_payload::RoundCompleted {
                round_id: round_id.clone(),
                consensus: consensus.clone(),
                decisions: records.len(),
            },
        );

        let status = if self.cancelled() {
            RoundStatus::Cancelled
        } else {
            RoundStatus::Completed
        };

        TriggeredRound {
            round_id,
            status,
            started_at,
            completed_at: chrono::Utc::now().to_rfc3339(),
            consensus,
            decisions: records,
            errors,
        }
    }

    fn fallback_symbol(&self, agent: &AgentConfig, snapshot: &MarketSnapshot) -> String {
        agent
            .preferred_symbols
            .first()
            .cloned()
            .or_else(|| snapshot.ticks.first().map(|t| t.symbol.clone()))
            .unwrap_or_else(|| "BTCUSDT".to_string())
    }

    /// Invoke every agent concurrently under the round deadline, staggering
    /// launches by the pacing delay. A failed or late agent contributes a
    /// hold, never an error.
    async fn fan_out(
        &self,
        config: &ArenaConfig,
        roster: &Arc<Vec<AgentConfig>>,
        snapshot: &MarketSnapshot,
        portfolios: &HashMap<String, crate::types::PortfolioContext>,
        news_block: &str,
    ) -> HashMap<String, TradingDecision> {
        let round_deadline = Duration::from_millis(config.t_round_ms);
        let pacing = Duration::from_millis(config.pacing_delay_ms);
        let started = Instant::now();

        let mut set: JoinSet<(String, TradingDecision)> = JoinSet::new();
        for (idx, agent) in roster.iter().enumerate() {
            let runner = self.parts.runner.clone();
            let agent = agent.clone();
            let snapshot = snapshot.clone();
            let portfolio = portfolios[&agent.agent_id].clone();
            let news_block = news_block.to_string();

            // Stagger provider load without eating into the whole round.
            let stagger = pacing
                .checked_mul(idx as u32)
                .unwrap_or(Duration::ZERO)
                .min(round_deadline / 2);

            set.spawn(async move {
                tokio::time::sleep(stagger).await;
                let budget = CallBudget::new(agent.call_budget_per_round);
                let deadline = round_deadline.saturating_sub(stagger);
                let decision = runner
                    .run(&agent, &snapshot, &portfolio, &news_block, deadline, &budget)
                    .await;
                (agent.agent_id.clone(), decision)
            });
        }

        let mut decisions: HashMap<String, TradingDecision> = HashMap::new();
        let gather = async {
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((agent_id, decision)) => {
                        decisions.insert(agent_id, decision);
                    }
                    Err(e) => {
                        // A panicked agent task is contained here.
                        warn!(error = %e, "agent task failed to join");
                    }
                }
            }
        };

        let remaining = round_deadline.saturating_sub(started.elapsed());
        if tokio::time::timeout(remaining, gather).await.is_err() {
            set.abort_all();
            warn!(
                deadline_ms = config.t_round_ms,
                finished = decisions.len(),
                total = roster.len(),
                "round deadline hit, late agents coerced to hold"
            );
        }

        for agent in roster.iter() {
            decisions.entry(agent.agent_id.clone()).or_insert_with(|| {
                TradingDecision::hold(
                    self.fallback_symbol(agent, snapshot),
                    format!("round timeout after {} ms", config.t_round_ms),
                )
            });
        }

        decisions
    }

    /// Submit an allowed non-hold decision to the venue (or simulate it in
    /// demo mode). Venue failures mark the decision unexecuted; they never
    /// fail the round.
    async fn execute_decision(
        &self,
        config: &ArenaConfig,
        agent: &AgentConfig,
        decision: &TradingDecision,
        snapshot: &MarketSnapshot,
    ) -> ExecutionOutcome {
        let Some(price) = snapshot.price_of(&decision.symbol) else {
            return ExecutionOutcome::failed(format!(
                "symbol {} not present in round snapshot",
                decision.symbol
            ));
        };

        let (units, notional) = match decision.action {
            TradeAction::Buy => (decision.quantity / price, decision.quantity),
            TradeAction::Sell => (decision.quantity, decision.quantity * price),
            TradeAction::Hold => return ExecutionOutcome::skipped(),
        };

        let tx_signature = match config.execution_mode {
            ExecutionMode::Demo => format!("demo-{}", Uuid::new_v4()),
            ExecutionMode::Live => {
                let venue = self.parts.venue.clone();
                let symbol = decision.symbol.clone();
                let side = match decision.action {
                    TradeAction::Buy => "BUY",
                    _ => "SELL",
                };
                let client_order_id = format!("helios-{}", Uuid::new_v4());
                let quantity = (decision.action == TradeAction::Sell).then_some(units);
                let quote = (decision.action == TradeAction::Buy).then_some(notional);

                let result = self
                    .parts
                    .rpc
                    .call("place_order", move || {
                        let venue = venue.clone();
                        let symbol = symbol.clone();
                        let client_order_id = client_order_id.clone();
                        async move {
                            venue
                                .place_market_order(&symbol, side, quantity, quote, &client_order_id)
                                .await
                        }
                    })
                    .await;

                match result {
                    Ok(body) => body["orderId"]
                        .as_u64()
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| format!("live-{}", Uuid::new_v4())),
                    Err(e) => {
                        warn!(agent = %agent.agent_id, error = %e, "venue execution failed");
                        return ExecutionOutcome::failed(format!("venue error: {e:#}"));
                    }
                }
            }
        };

        self.parts.fills.record(Fill {
            agent_id: agent.agent_id.clone(),
            symbol: decision.symbol.clone(),
            action: decision.action,
            quantity: units,
            notional,
            price,
            timestamp: chrono::Utc::now().to_rfc3339(),
        });

        ExecutionOutcome::filled(ExecutionDetails {
            tx_signature,
            filled_price: price,
            notional,
        })
    }

    /// Score, append, and publish every agent's decision. Partial results
    /// are still persisted when the round was cancelled mid-way.
    async fn record_round(
        &self,
        round_id: &str,
        config: &ArenaConfig,
        snapshot: &MarketSnapshot,
        snapshot_hash: &str,
        states: &[(AgentConfig, AgentRoundState)],
    ) -> Vec<RoundDecisionRecord> {
        let mut records = Vec::with_capacity(states.len());

        for (agent, state) in states {
            let scores = self
                .parts
                .scoring
                .evaluate(&agent.agent_id, &state.decision, snapshot);

            let witnesses: Vec<String> = states
                .iter()
                .filter(|(other, s)| {
                    other.agent_id != agent.agent_id && !s.decision.action.is_hold() && s.allowed
                })
                .map(|(other, _)| other.agent_id.clone())
                .collect();

            let entry = self.parts.ledger.append(EntryDraft {
                agent_id: agent.agent_id.clone(),
                round_id: round_id.to_string(),
                action: state.decision.action,
                symbol: state.decision.symbol.clone(),
                quantity: state.decision.quantity,
                reasoning: state.decision.reasoning.clone(),
                confidence: state.decision.confidence,
                intent: state.decision.intent.clone(),
                sources: state.decision.sources.clone(),
                predicted_outcome: state.decision.predicted_outcome.clone(),
                market_snapshot_hash: snapshot_hash.to_string(),
                price_at_trade: snapshot.price_of(&state.decision.symbol).unwrap_or(0.0),
                coherence_score: scores.coherence.score,
                hallucination_flags: scores.hallucination.flags.clone(),
                discipline_pass: scores.discipline.passed,
                depth_score: scores.depth.score,
                forensic_score: scores.composite,
                efficiency_score: scores.source_quality.score,
                witnesses,
                benchmark_version: config.benchmark_version.clone(),
            });

            self.parts.stream.publish(
                EventKind::AgentDecision,
                Some(agent.agent_id.clone()),
                &stream_payload::AgentDecision {
                    round_id: round_id.to_string(),
                    entry_id: entry.entry_id.clone(),
                    decision: state.decision.clone(),
                    composite: scores.composite,
                    intent_category: scores.taxonomy.category.to_string(),
                },
            );

            match (state.execution.executed, &state.execution.execution_error) {
                (true, _) => {
                    self.parts.stream.publish(
                        EventKind::TradeExecuted,
                        Some(agent.agent_id.clone()),
                        &stream_payload::TradeExecuted {
                            round_id: round_id.to_string(),
                            entry_id: entry.entry_id.clone(),
                            details: state.execution.details.clone(),
                        },
                    );
                }
                (false, Some(err)) => {
                    self.parts.stream.publish(
                        EventKind::TradeBlocked,
                        Some(agent.agent_id.clone()),
                        &stream_payload::TradeBlocked {
                            round_id: round_id.to_string(),
                            entry_id: entry.entry_id.clone(),
                            reason: Some(err.clone()),
                            activations: Vec::new(),
                        },
                    );
                }
                (false, None) if !state.allowed => {
                    self.parts.stream.publish(
                        EventKind::TradeBlocked,
                        Some(agent.agent_id.clone()),
                        &stream_payload::TradeBlocked {
                            round_id: round_id.to_string(),
                            entry_id: entry.entry_id.clone(),
                            reason: None,
                            activations: state.activations.clone(),
                        },
                    );
                }
                _ => {}
            }

            self.parts
                .leaderboard
                .on_decision(&agent.agent_id, &state.decision, scores.composite);

            let peers: Vec<TradingDecision> = states
                .iter()
                .filter(|(other, _)| other.agent_id != agent.agent_id)
                .map(|(_, s)| s.decision.clone())
                .collect();
            self.parts
                .scoring
                .record_decision(&agent.agent_id, state.decision.clone(), peers);

            records.push(RoundDecisionRecord {
                agent_id: agent.agent_id.clone(),
                action: state.decision.action,
                symbol: state.decision.symbol.clone(),
                quantity: state.decision.quantity,
                confidence: state.decision.confidence,
                allowed: state.allowed,
                executed: state.execution.executed,
                execution_error: state.execution.execution_error.clone(),
                breaker_activations: state.activations.clone(),
                entry_id: entry.entry_id,
                composite_score: scores.composite,
            });
        }

        records
    }
}

// ---------------------------------------------------------------------------
// Consensus
// ---------------------------------------------------------------------------

/// Classify one round's post-gate decisions.
pub fn classify_consensus<'a, I>(decisions: I) -> String
where
    I: Iterator<Item = &'a TradingDecision>,
{
    let mut buys = 0usize;
    let mut sells = 0usize;
    for d in decisions {
        match d.action {
            TradeAction::Buy => buys += 1,
            TradeAction::Sell => sells += 1,
            TradeAction::Hold => {}
        }
    }

    if buys + sells == 0 {
        "no_trades".to_string()
    } else if buys == 0 || sells == 0 {
        "unanimous".to_string()
    } else if buys > sells {
        "majority_buy".to_string()
    } else if sells > buys {
        "majority_sell".to_string()
    } else {
        "split".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::provider::LlmProvider;
    use crate::news::{NewsCache, NewsFeed, NewsItem};
    use crate::types::TradingStyle;
    use anyhow::Result;
    use async_trait::async_trait;

    /// Provider that returns a per-agent scripted response with a delay.
    struct ScriptedArena {
        responses: HashMap<String, String>,
        delay: Duration,
    }

    #[async_trait]
    impl LlmProvider for ScriptedArena {
        async fn complete(&self, model: &str, _prompt: &str) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            self.responses
                .get(model)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no script for model {model}"))
        }
    }

    struct NoNews;

    #[async_trait]
    impl NewsFeed for NoNews {
        async fn fetch(&self, _symbol: &str) -> Result<Vec<NewsItem>> {
            Ok(Vec::new())
        }
    }

    fn agent(id: &str) -> AgentConfig {
        AgentConfig {
            agent_id: id.to_string(),
            name: id.to_string(),
            provider: "test".to_string(),
            // Model doubles as the script key.
            model: id.to_string(),
            trading_style: TradingStyle::Conservative,
            risk_tolerance: 0.5,
            preferred_symbols: vec!["BTCUSDT".to_string()],
            call_budget_per_round: 50,
        }
    }

    fn buy_script(symbol: &str, quantity: f64) -> String {
        serde_json::json!({
            "action": "buy",
            "symbol": symbol,
            "quantity": quantity,
            "reasoning": "breakout above resistance on strong volume, therefore entering",
            "confidence": 70,
            "intent": "enter",
            "sources": ["price", "volume"],
        })
        .to_string()
    }

    fn sell_script(symbol: &str, quantity: f64) -> String {
        serde_json::json!({
            "action": "sell",
            "symbol": symbol,
            "quantity": quantity,
            "reasoning": "distribution at resistance with fading volume, therefore exiting",
            "confidence": 60,
            "intent": "exit",
            "sources": ["price"],
        })
        .to_string()
    }

    fn hold_script() -> String {
        serde_json::json!({
            "action": "hold",
            "symbol": "BTCUSDT",
            "quantity": 0,
            "reasoning": "ranges are tight and volume is thin, waiting for confirmation",
            "confidence": 40,
            "intent": "wait",
        })
        .to_string()
    }

    fn build(
        agents: Vec<AgentConfig>,
        responses: HashMap<String, String>,
        delay: Duration,
        mut config: ArenaConfig,
    ) -> Arc<RoundOrchestrator> {
        config.symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
        let config = Arc::new(RwLock::new(config));
        let venue = Arc::new(VenueClient::new("", ""));
        let rpc = Arc::new(RateLimitedRpc::new(
            5,
            Duration::from_millis(1_000),
            Duration::from_millis(5_000),
        ));
        let market = Arc::new(MarketDataProvider::new(
            ExecutionMode::Demo,
            config.read().symbols.clone(),
            venue.clone(),
            rpc.clone(),
        ));
        let cfg = config.read().clone();

        Arc::new(RoundOrchestrator::new(OrchestratorParts {
            config: config.clone(),
            roster: Arc::new(agents),
            runner: Arc::new(AgentRunner::new(Arc::new(ScriptedArena {
                responses,
                delay,
            }))),
            market,
            news: Arc::new(NewsCache::new(Arc::new(NoNews))),
            ledger: Arc::new(ForensicLedger::new(cfg.max_ledger_size)),
            scoring: Arc::new(ScoringEngine::new(cfg.max_decisions_per_agent)),
            leaderboard: Arc::new(LeaderboardStore::new()),
            stream: Arc::new(TradeStreamBus::new(cfg.max_events, cfg.catch_up_limit)),
            fills: Arc::new(FillStore::new(cfg.starting_cash)),
            exec_stats: Arc::new(ExecutionStatsStore::new(Duration::from_secs(
                cfg.velocity_window_secs,
            ))),
            venue,
            rpc,
        }))
    }

    fn three_agent_scripts() -> (Vec<AgentConfig>, HashMap<String, String>) {
        let agents = vec![agent("xena"), agent("yuri"), agent("zane")];
        let mut responses = HashMap::new();
        responses.insert("xena".to_string(), buy_script("BTCUSDT", 200.0));
        responses.insert("yuri".to_string(), buy_script("ETHUSDT", 150.0));
        responses.insert("zane".to_string(), hold_script());
        (agents, responses)
    }

    #[tokio::test]
    async fn completed_round_records_every_agent() {
        let (agents, responses) = three_agent_scripts();
        let orch = build(agents, responses, Duration::ZERO, ArenaConfig::default());

        let outcome = orch.trigger().await;
        let TriggerOutcome::Completed(round) = outcome else {
            panic!("expected a completed round");
        };

        assert_eq!(round.status, RoundStatus::Completed);
        assert_eq!(round.decisions.len(), 3);
        assert_eq!(round.consensus, "unanimous");
        assert_eq!(orch.parts.ledger.len(), 3);
        assert!(orch.parts.ledger.verify_integrity().intact);

        // Two buys executed in demo mode, hold skipped.
        let executed: Vec<_> = round.decisions.iter().filter(|d| d.executed).collect();
        assert_eq!(executed.len(), 2);
        assert!(executed.iter().all(|d| d.execution_error.is_none()));
    }

    #[tokio::test]
    async fn concurrent_trigger_is_rejected_busy() {
        let (agents, responses) = three_agent_scripts();
        let orch = build(
            agents,
            responses,
            Duration::from_millis(300),
            ArenaConfig::default(),
        );

        let first = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.trigger().await })
        };
        // Let the first trigger win the lock.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = orch.trigger().await;

        assert!(matches!(second, TriggerOutcome::Busy { .. }));
        // The rejected trigger wrote nothing.
        assert_eq!(orch.parts.ledger.len(), 0);

        let first = first.await.unwrap();
        assert!(matches!(first, TriggerOutcome::Completed(_)));
        assert_eq!(orch.parts.ledger.len(), 3);
        assert!(!orch.status().locked);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_agent_times_out_and_others_complete() {
        let agents = vec![agent("fast"), agent("slow")];
        let mut responses = HashMap::new();
        responses.insert("fast".to_string(), buy_script("BTCUSDT", 100.0));
        responses.insert("slow".to_string(), buy_script("ETHUSDT", 100.0));

        let mut config = ArenaConfig::default();
        config.t_round_ms = 500;
        config.pacing_delay_ms = 0;

        // Both agents share one delay; make it exceed the round deadline for
        // a second orchestrator to confirm the timeout path, and first check
        // the happy path with a fast script.
        let orch = build(
            agents.clone(),
            responses.clone(),
            Duration::from_millis(1_500),
            config.clone(),
        );
        let TriggerOutcome::Completed(round) = orch.trigger().await else {
            panic!("expected completion");
        };

        // Per-agent deadline fired inside the runner: both are holds with a
        // deadline reason, the round still completed and recorded them.
        assert_eq!(round.status, RoundStatus::Completed);
        assert_eq!(round.decisions.len(), 2);
        for d in &round.decisions {
            assert_eq!(d.action, TradeAction::Hold);
        }
        let entries = orch.parts.ledger.query(&crate::ledger::LedgerQuery::default());
        assert!(entries
            .entries
            .iter()
            .all(|e| e.reasoning.contains("deadline") || e.reasoning.contains("round timeout")));
    }

    #[tokio::test]
    async fn oversized_buy_is_clamped_on_the_way_through() {
        // Default cash 10_000, cap fraction 0.25: a 9_000 buy clamps to 2_500.
        let agents = vec![agent("whale")];
        let mut responses = HashMap::new();
        responses.insert("whale".to_string(), buy_script("BTCUSDT", 9_000.0));

        let orch = build(agents, responses, Duration::ZERO, ArenaConfig::default());
        let TriggerOutcome::Completed(round) = orch.trigger().await else {
            panic!("expected completion");
        };

        let d = &round.decisions[0];
        assert!(d.allowed);
        assert!(d.executed);
        assert!((d.quantity - 2_500.0).abs() < 1e-9);
        assert_eq!(d.breaker_activations.len(), 1);
    }

    #[tokio::test]
    async fn insufficient_sell_is_blocked_and_recorded() {
        let agents = vec![agent("bear")];
        let mut responses = HashMap::new();
        responses.insert("bear".to_string(), sell_script("BTCUSDT", 5.0));

        let orch = build(agents, responses, Duration::ZERO, ArenaConfig::default());
        let TriggerOutcome::Completed(round) = orch.trigger().await else {
            panic!("expected completion");
        };

        let d = &round.decisions[0];
        assert!(!d.allowed);
        assert!(!d.executed);
        assert_eq!(d.action, TradeAction::Hold);
        assert_eq!(round.consensus, "no_trades");

        // The blocked decision still landed in the ledger as a hold, and a
        // blocked trade never counts toward the velocity window.
        assert_eq!(orch.parts.ledger.len(), 1);
        assert_eq!(orch.parts.exec_stats.stats_for("bear").trades_in_window, 0);
    }

    #[tokio::test]
    async fn witnesses_exclude_holds_and_self() {
        let (agents, responses) = three_agent_scripts();
        let orch = build(agents, responses, Duration::ZERO, ArenaConfig::default());
        let TriggerOutcome::Completed(_) = orch.trigger().await else {
            panic!("expected completion");
        };

        let entries = orch.parts.ledger.query(&crate::ledger::LedgerQuery::default());
        let xena = entries
            .entries
            .iter()
            .find(|e| e.agent_id == "xena")
            .unwrap();
        assert_eq!(xena.witnesses, vec!["yuri".to_string()]);

        let zane = entries
            .entries
            .iter()
            .find(|e| e.agent_id == "zane")
            .unwrap();
        let mut witnesses = zane.witnesses.clone();
        witnesses.sort();
        assert_eq!(witnesses, vec!["xena".to_string(), "yuri".to_string()]);
    }

    #[tokio::test]
    async fn stream_ordering_round_started_first_completed_last() {
        let (agents, responses) = three_agent_scripts();
        let orch = build(agents, responses, Duration::ZERO, ArenaConfig::default());
        let TriggerOutcome::Completed(_) = orch.trigger().await else {
            panic!("expected completion");
        };

        let events = orch
            .parts
            .stream
            .recent(&crate::stream::EventFilter::default(), 100, None);
        // Chronological view (recent is newest first).
        let chronological: Vec<_> = events.iter().rev().collect();
        assert_eq!(chronological.first().unwrap().kind, EventKind::RoundStarted);
        assert_eq!(chronological.last().unwrap().kind, EventKind::RoundCompleted);
        let decision_count = chronological
            .iter()
            .filter(|e| e.kind == EventKind::AgentDecision)
            .count();
        assert_eq!(decision_count, 3);
    }

    #[tokio::test]
    async fn cancellation_converts_agents_to_holds_but_still_records() {
        let (agents, responses) = three_agent_scripts();
        let orch = build(agents, responses, Duration::ZERO, ArenaConfig::default());

        orch.cancel_current();
        let TriggerOutcome::Completed(round) = orch.trigger().await else {
            panic!("expected completion");
        };
        // cancel_current before trigger is cleared at round start.
        assert_eq!(round.status, RoundStatus::Completed);

        // Now cancel mid-flight via a slow provider.
        let (agents, responses) = three_agent_scripts();
        let orch = build(
            agents,
            responses,
            Duration::from_millis(300),
            ArenaConfig::default(),
        );
        let handle = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.trigger().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        orch.cancel_current();

        let TriggerOutcome::Completed(round) = handle.await.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(round.status, RoundStatus::Cancelled);
        // Partial results persisted: every agent has a ledger entry, and
        // every pending agent was converted to a hold before recording.
        assert_eq!(orch.parts.ledger.len(), 3);
        assert!(round
            .decisions
            .iter()
            .all(|d| d.action == TradeAction::Hold && !d.executed));

        // The two allowed buys carry the cancelled reason; zane's own hold
        // keeps its original reasoning.
        let cancelled_holds = orch
            .parts
            .ledger
            .query(&crate::ledger::LedgerQuery::default())
            .entries
            .iter()
            .filter(|e| e.reasoning.contains("cancelled"))
            .count();
        assert_eq!(cancelled_holds, 2);

        // Allowed non-hold decisions still evolved the velocity stats even
        // though no venue call was made.
        assert_eq!(orch.parts.exec_stats.stats_for("xena").trades_in_window, 1);
        assert_eq!(orch.parts.exec_stats.stats_for("yuri").trades_in_window, 1);
        assert_eq!(orch.parts.exec_stats.stats_for("zane").trades_in_window, 0);
    }

    #[test]
    fn consensus_classification_table() {
        let mk = |action: TradeAction| {
            let mut d = TradingDecision::hold("BTCUSDT", "consensus classification test");
            d.action = action;
            d
        };

        let all_hold = vec![mk(TradeAction::Hold), mk(TradeAction::Hold)];
        assert_eq!(classify_consensus(all_hold.iter()), "no_trades");

        let all_buy = vec![mk(TradeAction::Buy), mk(TradeAction::Buy), mk(TradeAction::Hold)];
        assert_eq!(classify_consensus(all_buy.iter()), "unanimous");

        let mostly_buy = vec![mk(TradeAction::Buy), mk(TradeAction::Buy), mk(TradeAction::Sell)];
        assert_eq!(classify_consensus(mostly_buy.iter()), "majority_buy");

        let mostly_sell = vec![mk(TradeAction::Sell), mk(TradeAction::Sell), mk(TradeAction::Buy)];
        assert_eq!(classify_consensus(mostly_sell.iter()), "majority_sell");

        let split = vec![mk(TradeAction::Buy), mk(TradeAction::Sell)];
        assert_eq!(classify_consensus(split.iter()), "split");
    }
}
