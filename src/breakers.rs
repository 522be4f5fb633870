// =============================================================================
// Circuit Breakers: deterministic pre-trade gates protecting capital
// =============================================================================
//
// Breakers, evaluated in order against a proposed decision:
//   1. Velocity          - too many trades inside the trailing window.
//   2. Insufficient funds - buy notional exceeds cash / sell exceeds holding.
//   3. Position size     - buy notional above a fraction of cash: CLAMPED,
//                          not blocked.
//   4. Self trade        - decision targets the arena vault itself.
//   5. Loss streak       - consecutive losses halt all non-hold actions.
//
// `evaluate` is a pure function: identical (decision, portfolio, stats)
// inputs produce identical outputs. Rolling per-agent stats live in
// `ExecutionStatsStore` and are mutated only from the orchestrator path.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ArenaConfig;
use crate::types::{PortfolioContext, TradeAction, TradingDecision};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerKind {
    Velocity,
    InsufficientFunds,
    InsufficientPosition,
    PositionSize,
    SelfTrade,
    LossStreak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Quantity reduced; the trade still goes through.
    Clamp,
    /// Action coerced to hold.
    Block,
    /// Action coerced to hold until the streak resets.
    Halt,
}

/// One breaker that fired during evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerActivation {
    pub kind: BreakerKind,
    pub severity: Severity,
    pub reason: String,
}

/// Rolling per-agent execution stats, snapshotted for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TradeStats {
    pub trades_in_window: u32,
    pub consecutive_losses: u32,
    pub round_drawdown_pct: f64,
}

impl Default for TradeStats {
    fn default() -> Self {
        Self {
            trades_in_window: 0,
            consecutive_losses: 0,
            round_drawdown_pct: 0.0,
        }
    }
}

/// The gate's output: the (possibly coerced) decision plus what fired.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerVerdict {
    pub allowed: bool,
    pub decision: TradingDecision,
    pub activations: Vec<CircuitBreakerActivation>,
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate the breaker chain against a proposed decision.
///
/// A blocking breaker coerces the action to hold and stops the chain; the
/// position-size breaker clamps quantity and lets evaluation continue.
pub fn evaluate(
    decision: &TradingDecision,
    portfolio: &PortfolioContext,
    stats: &TradeStats,
    config: &ArenaConfig,
) -> BreakerVerdict {
    let mut decision = decision.clone();
    let mut activations = Vec::new();

    // Holds pass untouched; there is nothing to gate.
    if decision.action.is_hold() {
        return BreakerVerdict {
            allowed: true,
            decision,
            activations,
        };
    }

    // 1. Velocity
    if stats.trades_in_window >= config.max_trades_per_window {
        let reason = format!(
            "{} trades in the last {} s (limit {})",
            stats.trades_in_window, config.velocity_window_secs, config.max_trades_per_window
        );
        activations.push(CircuitBreakerActivation {
            kind: BreakerKind::Velocity,
            severity: Severity::Block,
            reason: reason.clone(),
        });
        return blocked(decision, activations, &reason);
    }

    // 2. Insufficient cash / position
    match decision.action {
        TradeAction::Buy => {
            if decision.quantity > portfolio.cash_balance {
                let reason = format!(
                    "buy notional {:.2} exceeds cash balance {:.2}",
                    decision.quantity, portfolio.cash_balance
                );
                activations.push(CircuitBreakerActivation {
                    kind: BreakerKind::InsufficientFunds,
                    severity: Severity::Block,
                    reason: reason.clone(),
                });
                return blocked(decision, activations, &reason);
            }
        }
        TradeAction::Sell => {
            let held = portfolio
                .position(&decision.symbol)
                .map(|p| p.quantity)
                .unwrap_or(0.0);
            if decision.quantity > held {
                let reason = format!(
                    "sell quantity {:.6} exceeds held {:.6} {}",
                    decision.quantity, held, decision.symbol
                );
                activations.push(CircuitBreakerActivation {
                    kind: BreakerKind::InsufficientPosition,
                    severity: Severity::Block,
                    reason: reason.clone(),
                });
                return blocked(decision, activations, &reason);
            }
        }
        TradeAction::Hold => unreachable!("holds returned above"),
    }

    // 3. Position size (buy only): clamp, not block
    if decision.action == TradeAction::Buy {
        let cap = config.max_position_fraction * portfolio.cash_balance;
        if decision.quantity > cap {
            let reason = format!(
                "buy notional {:.2} clamped to {:.2} ({:.0}% of cash)",
                decision.quantity,
                cap,
                config.max_position_fraction * 100.0
            );
            debug!(symbol = %decision.symbol, "{reason}");
            decision.quantity = cap;
            activations.push(CircuitBreakerActivation {
                kind: BreakerKind::PositionSize,
                severity: Severity::Clamp,
                reason,
            });
        }
    }

    // 4. Self trade
    if decision.symbol == config.wallet_address {
        let reason = format!("decision targets the arena vault '{}'", config.wallet_address);
        activations.push(CircuitBreakerActivation {
            kind: BreakerKind::SelfTrade,
            severity: Severity::Block,
            reason: reason.clone(),
        });
        return blocked(decision, activations, &reason);
    }

    // 5. Loss streak
    if stats.consecutive_losses >= config.loss_streak_halt {
        let reason = format!(
            "{} consecutive losses (halt at {})",
            stats.consecutive_losses, config.loss_streak_halt
        );
        activations.push(CircuitBreakerActivation {
            kind: BreakerKind::LossStreak,
            severity: Severity::Halt,
            reason: reason.clone(),
        });
        return blocked(decision, activations, &reason);
    }

    BreakerVerdict {
        allowed: true,
        decision,
        activations,
    }
}

fn blocked(
    mut decision: TradingDecision,
    activations: Vec<CircuitBreakerActivation>,
    reason: &str,
) -> BreakerVerdict {
    warn!(symbol = %decision.symbol, action = %decision.action, reason, "decision blocked by circuit breaker");
    decision.action = TradeAction::Hold;
    decision.quantity = 0.0;
    BreakerVerdict {
        allowed: false,
        decision,
        activations,
    }
}

// ---------------------------------------------------------------------------
// Execution stats store
// ---------------------------------------------------------------------------

struct AgentExecStats {
    recent_trades: VecDeque<Instant>,
    consecutive_losses: u32,
    round_drawdown_pct: f64,
}

impl AgentExecStats {
    fn new() -> Self {
        Self {
            recent_trades: VecDeque::new(),
            consecutive_losses: 0,
            round_drawdown_pct: 0.0,
        }
    }
}

/// Rolling execution stats per agent, feeding the velocity and loss-streak
/// breakers. Mutated only from the orchestrator path.
pub struct ExecutionStatsStore {
    window: Duration,
    inner: RwLock<HashMap<String, AgentExecStats>>,
}

impl ExecutionStatsStore {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Record one executed non-hold decision for `agent_id`.
    pub fn record_trade_execution(&self, agent_id: &str) {
        let mut inner = self.inner.write();
        let stats = inner
            .entry(agent_id.to_string())
            .or_insert_with(AgentExecStats::new);
        stats.recent_trades.push_back(Instant::now());
    }

    /// Record a resolved outcome; losses extend the streak, wins reset it.
    pub fn record_outcome(&self, agent_id: &str, pnl_pct: f64) {
        let mut inner = self.inner.write();
        let stats = inner
            .entry(agent_id.to_string())
            .or_insert_with(AgentExecStats::new);
        if pnl_pct < 0.0 {
            stats.consecutive_losses += 1;
        } else {
            stats.consecutive_losses = 0;
        }
    }

    /// Update the agent's current-round drawdown.
    pub fn set_round_drawdown(&self, agent_id: &str, drawdown_pct: f64) {
        let mut inner = self.inner.write();
        let stats = inner
            .entry(agent_id.to_string())
            .or_insert_with(AgentExecStats::new);
        stats.round_drawdown_pct = drawdown_pct;
    }

    /// Snapshot the stats for one evaluation, pruning aged trades.
    pub fn stats_for(&self, agent_id: &str) -> TradeStats {
        let mut inner = self.inner.write();
        let stats = inner
            .entry(agent_id.to_string())
            .or_insert_with(AgentExecStats::new);

        let now = Instant::now();
        while let Some(front) = stats.recent_trades.front() {
            if now.duration_since(*front) >= self.window {
                stats.recent_trades.pop_front();
            } else {
                break;
            }
        }

        TradeStats {
            trades_in_window: stats.recent_trades.len() as u32,
            consecutive_losses: stats.consecutive_losses,
            round_drawdown_pct: stats.round_drawdown_pct,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn buy(symbol: &str, notional: f64) -> TradingDecision {
        TradingDecision {
            action: TradeAction::Buy,
            symbol: symbol.to_string(),
            quantity: notional,
            reasoning: "momentum setup with volume confirmation".into(),
            confidence: 70.0,
            intent: "enter".into(),
            sources: vec!["price".into()],
            predicted_outcome: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn sell(symbol: &str, quantity: f64) -> TradingDecision {
        let mut d = buy(symbol, quantity);
        d.action = TradeAction::Sell;
        d
    }

    fn portfolio_with_cash(cash: f64) -> PortfolioContext {
        PortfolioContext::with_cash(cash)
    }

    #[test]
    fn oversized_buy_is_clamped_not_blocked() {
        let config = ArenaConfig::default();
        let portfolio = portfolio_with_cash(1000.0);
        let verdict = evaluate(
            &buy("BTCUSDT", 900.0),
            &portfolio,
            &TradeStats::default(),
            &config,
        );

        assert!(verdict.allowed);
        assert_eq!(verdict.decision.action, TradeAction::Buy);
        assert!((verdict.decision.quantity - 250.0).abs() < 1e-9);
        assert_eq!(verdict.activations.len(), 1);
        assert_eq!(verdict.activations[0].kind, BreakerKind::PositionSize);
        assert_eq!(verdict.activations[0].severity, Severity::Clamp);
    }

    #[test]
    fn buy_beyond_cash_is_blocked() {
        let config = ArenaConfig::default();
        let verdict = evaluate(
            &buy("BTCUSDT", 2000.0),
            &portfolio_with_cash(1000.0),
            &TradeStats::default(),
            &config,
        );

        assert!(!verdict.allowed);
        assert_eq!(verdict.decision.action, TradeAction::Hold);
        assert_eq!(verdict.activations[0].kind, BreakerKind::InsufficientFunds);
    }

    #[test]
    fn sell_without_position_is_blocked() {
        let config = ArenaConfig::default();
        let verdict = evaluate(
            &sell("ETHUSDT", 1.5),
            &portfolio_with_cash(1000.0),
            &TradeStats::default(),
            &config,
        );

        assert!(!verdict.allowed);
        assert_eq!(
            verdict.activations[0].kind,
            BreakerKind::InsufficientPosition
        );
    }

    #[test]
    fn velocity_breaker_blocks_before_balance_checks() {
        let config = ArenaConfig::default();
        let stats = TradeStats {
            trades_in_window: config.max_trades_per_window,
            ..TradeStats::default()
        };
        let verdict = evaluate(&buy("BTCUSDT", 10.0), &portfolio_with_cash(1000.0), &stats, &config);

        assert!(!verdict.allowed);
        assert_eq!(verdict.activations.len(), 1);
        assert_eq!(verdict.activations[0].kind, BreakerKind::Velocity);
    }

    #[test]
    fn loss_streak_halts_non_hold() {
        let config = ArenaConfig::default();
        let stats = TradeStats {
            consecutive_losses: config.loss_streak_halt,
            ..TradeStats::default()
        };
        let verdict = evaluate(&buy("BTCUSDT", 10.0), &portfolio_with_cash(1000.0), &stats, &config);

        assert!(!verdict.allowed);
        assert_eq!(verdict.activations[0].kind, BreakerKind::LossStreak);
        assert_eq!(verdict.activations[0].severity, Severity::Halt);
    }

    #[test]
    fn self_trade_is_blocked() {
        let config = ArenaConfig::default();
        let verdict = evaluate(
            &buy(&config.wallet_address.clone(), 10.0),
            &portfolio_with_cash(1000.0),
            &TradeStats::default(),
            &config,
        );

        assert!(!verdict.allowed);
        assert_eq!(verdict.activations[0].kind, BreakerKind::SelfTrade);
    }

    #[test]
    fn hold_passes_untouched() {
        let config = ArenaConfig::default();
        let verdict = evaluate(
            &TradingDecision::hold("BTCUSDT", "waiting for confirmation"),
            &portfolio_with_cash(1000.0),
            &TradeStats::default(),
            &config,
        );

        assert!(verdict.allowed);
        assert!(verdict.activations.is_empty());
        assert_eq!(verdict.decision.action, TradeAction::Hold);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let config = ArenaConfig::default();
        let decision = buy("BTCUSDT", 900.0);
        let portfolio = portfolio_with_cash(1000.0);
        let stats = TradeStats {
            trades_in_window: 2,
            consecutive_losses: 1,
            round_drawdown_pct: 0.8,
        };

        let a = evaluate(&decision, &portfolio, &stats, &config);
        let b = evaluate(&decision, &portfolio, &stats, &config);
        assert_eq!(
            serde_json::to_value(&a.activations).unwrap(),
            serde_json::to_value(&b.activations).unwrap()
        );
        assert_eq!(a.allowed, b.allowed);
        assert_eq!(a.decision.quantity, b.decision.quantity);
    }

    #[test]
    fn stats_store_counts_are_monotone() {
        let store = ExecutionStatsStore::new(Duration::from_secs(60));
        assert_eq!(store.stats_for("atlas").trades_in_window, 0);

        store.record_trade_execution("atlas");
        store.record_trade_execution("atlas");
        assert_eq!(store.stats_for("atlas").trades_in_window, 2);

        store.record_outcome("atlas", -1.0);
        store.record_outcome("atlas", -0.5);
        assert_eq!(store.stats_for("atlas").consecutive_losses, 2);
        store.record_outcome("atlas", 2.0);
        assert_eq!(store.stats_for("atlas").consecutive_losses, 0);
    }

    #[test]
    fn aged_trades_fall_out_of_the_window() {
        let store = ExecutionStatsStore::new(Duration::from_millis(0));
        store.record_trade_execution("atlas");
        // Zero-width window: the trade ages out immediately.
        assert_eq!(store.stats_for("atlas").trades_in_window, 0);
    }
}
