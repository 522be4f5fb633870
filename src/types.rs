// =============================================================================
// Shared types used across the Helios Arena engine
// =============================================================================
//
// Wire-format types (decisions, ledger-adjacent records, stream events)
// serialize camelCase: they are part of the forensic export format and the
// canonical hashing key order. Internal dashboard types stay snake_case.
// =============================================================================

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// Trading personality assigned to an agent. Shapes the prompt and the
/// demo-mode heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingStyle {
    Conservative,
    Aggressive,
    Contrarian,
}

impl Default for TradingStyle {
    fn default() -> Self {
        Self::Conservative
    }
}

impl std::fmt::Display for TradingStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conservative => write!(f, "conservative"),
            Self::Aggressive => write!(f, "aggressive"),
            Self::Contrarian => write!(f, "contrarian"),
        }
    }
}

/// Immutable, process-lifetime configuration of a single arena agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Stable key used across the ledger, leaderboard, and stream.
    pub agent_id: String,
    /// Human-readable display name.
    pub name: String,
    /// Provider tag (e.g. "openai", "anthropic").
    pub provider: String,
    /// Model identifier passed to the provider.
    pub model: String,
    #[serde(default)]
    pub trading_style: TradingStyle,
    /// Risk appetite in [0, 1]; surfaced in the prompt.
    #[serde(default = "default_risk_tolerance")]
    pub risk_tolerance: f64,
    /// Symbols this agent is nudged toward in its prompt.
    #[serde(default)]
    pub preferred_symbols: Vec<String>,
    /// Maximum LLM invocations per round for this agent.
    #[serde(default = "default_call_budget")]
    pub call_budget_per_round: u32,
}

fn default_risk_tolerance() -> f64 {
    0.5
}

fn default_call_budget() -> u32 {
    50
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// One symbol's point-in-time market state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolTick {
    pub symbol: String,
    /// Positive last price.
    pub price: f64,
    /// Signed 24 h change as a fraction (0.05 = +5 %).
    pub change_24h: f64,
    /// Nonnegative 24 h quote volume.
    pub volume_24h: f64,
}

/// Immutable market snapshot captured once per round and shared read-only by
/// every agent in that round.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub captured_at: String,
    pub ticks: Vec<SymbolTick>,
}

impl MarketSnapshot {
    /// Look up the price of `symbol`, if present in this snapshot.
    pub fn price_of(&self, symbol: &str) -> Option<f64> {
        self.ticks.iter().find(|t| t.symbol == symbol).map(|t| t.price)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.ticks.iter().map(|t| t.symbol.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------------

/// One open holding inside an agent's portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioPosition {
    pub symbol: String,
    pub quantity: f64,
    pub avg_cost: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub unrealized_pnl_percent: f64,
}

/// Per-(agent, round) portfolio context, computed freshly at round start from
/// executed-trade history plus live prices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioContext {
    pub cash_balance: f64,
    pub total_value: f64,
    pub total_pnl: f64,
    pub total_pnl_percent: f64,
    pub positions: Vec<PortfolioPosition>,
}

impl PortfolioContext {
    /// Fresh portfolio holding only starting cash.
    pub fn with_cash(cash: f64) -> Self {
        Self {
            cash_balance: cash,
            total_value: cash,
            total_pnl: 0.0,
            total_pnl_percent: 0.0,
            positions: Vec::new(),
        }
    }

    pub fn position(&self, symbol: &str) -> Option<&PortfolioPosition> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// The three actions an agent can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    pub fn is_hold(self) -> bool {
        matches!(self, Self::Hold)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Hold => "hold",
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single trading decision produced by an agent. Never mutated after emit.
///
/// `quantity` is USDC notional for buys and unit quantity for sells.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingDecision {
    pub action: TradeAction,
    pub symbol: String,
    pub quantity: f64,
    pub reasoning: String,
    /// Self-reported confidence in [0, 100].
    pub confidence: f64,
    pub intent: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_outcome: Option<String>,
    pub timestamp: String,
}

impl TradingDecision {
    /// Synthetic hold, used for every expected failure on the agent path
    /// (deadline, parse failure, provider error, cancellation).
    pub fn hold(symbol: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            action: TradeAction::Hold,
            symbol: symbol.into(),
            quantity: 0.0,
            reasoning: reasoning.into(),
            confidence: 0.0,
            intent: "hold".to_string(),
            sources: Vec::new(),
            predicted_outcome: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Venue fill details attached to an executed decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDetails {
    pub tx_signature: String,
    pub filled_price: f64,
    pub notional: f64,
}

/// What happened to a decision after gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ExecutionDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_error: Option<String>,
}

impl ExecutionOutcome {
    pub fn skipped() -> Self {
        Self {
            executed: false,
            details: None,
            execution_error: None,
        }
    }

    pub fn filled(details: ExecutionDetails) -> Self {
        Self {
            executed: true,
            details: Some(details),
            execution_error: None,
        }
    }

    pub fn failed(err: impl Into<String>) -> Self {
        Self {
            executed: false,
            details: None,
            execution_error: Some(err.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Stream events
// ---------------------------------------------------------------------------

/// Closed set of stream event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AgentDecision,
    TradeExecuted,
    TradeBlocked,
    RoundStarted,
    RoundCompleted,
    CircuitBreaker,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AgentDecision => "agent_decision",
            Self::TradeExecuted => "trade_executed",
            Self::TradeBlocked => "trade_blocked",
            Self::RoundStarted => "round_started",
            Self::RoundCompleted => "round_completed",
            Self::CircuitBreaker => "circuit_breaker",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agent_decision" => Some(Self::AgentDecision),
            "trade_executed" => Some(Self::TradeExecuted),
            "trade_blocked" => Some(Self::TradeBlocked),
            "round_started" => Some(Self::RoundStarted),
            "round_completed" => Some(Self::RoundCompleted),
            "circuit_breaker" => Some(Self::CircuitBreaker),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event on the trade stream. Ids are assigned by the bus and strictly
/// increase; the ring holds newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeStreamEvent {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub timestamp: String,
    pub payload: serde_json::Value,
}

// =============================================================================
// Tests
// =============================================================================
