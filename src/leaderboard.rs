// =============================================================================
// Leaderboard Store: rolling per-agent aggregates
// =============================================================================
//
// Updated on every ledger append (decision counts, confidence, composite)
// and on every outcome resolution (win rate, P&L, Sharpe, drawdown, rating).
// Queries sort by a caller-chosen key with an ELO-like rating as tie-break.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;

use crate::types::TradingDecision;

/// Starting rating for a fresh agent.
const INITIAL_RATING: f64 = 1200.0;
/// Rating anchor the outcome is scored against.
const RATING_ANCHOR: f64 = 1500.0;
/// Rating step size.
const RATING_K: f64 = 24.0;
/// Resolved P&L samples retained per agent for Sharpe/drawdown.
const MAX_PNL_SAMPLES: usize = 1_000;

/// One agent's row on the leaderboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStanding {
    pub agent_id: String,
    pub decisions: u64,
    pub trades: u64,
    pub resolved: u64,
    pub wins: u64,
    pub win_rate: f64,
    pub total_pnl_percent: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub avg_confidence: f64,
    pub composite_score: f64,
    pub rating: f64,
}

/// Sort keys accepted by the leaderboard query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Composite,
    WinRate,
    Pnl,
    Sharpe,
    Trades,
    Confidence,
}

impl SortKey {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "composite" => Some(Self::Composite),
            "winRate" | "win_rate" => Some(Self::WinRate),
            "pnl" => Some(Self::Pnl),
            "sharpe" => Some(Self::Sharpe),
            "trades" => Some(Self::Trades),
            "confidence" => Some(Self::Confidence),
            _ => None,
        }
    }
}

struct AgentAggregates {
    decisions: u64,
    trades: u64,
    resolved: u64,
    wins: u64,
    confidence_sum: f64,
    composite_sum: f64,
    pnl_samples: Vec<f64>,
    cumulative_pnl: f64,
    peak_pnl: f64,
    max_drawdown: f64,
    rating: f64,
}

impl AgentAggregates {
    fn new() -> Self {
        Self {
            decisions: 0,
            trades: 0,
            resolved: 0,
            wins: 0,
            confidence_sum: 0.0,
            composite_sum: 0.0,
            pnl_samples: Vec::new(),
            cumulative_pnl: 0.0,
            peak_pnl: 0.0,
            max_drawdown: 0.0,
            rating: INITIAL_RATING,
        }
    }

    fn standing(&self, agent_id: &str) -> AgentStanding {
        let sharpe = if self.pnl_samples.len() >= 2 {
            let n = self.pnl_samples.len() as f64;
            let mean = self.pnl_samples.iter().sum::<f64>() / n;
            let var = self
                .pnl_samples
                .iter()
                .map(|p| (p - mean).powi(2))
                .sum::<f64>()
                / (n - 1.0);
            if var > 0.0 {
                mean / var.sqrt()
            } else {
                0.0
            }
        } else {
            0.0
        };

        AgentStanding {
            agent_id: agent_id.to_string(),
            decisions: self.decisions,
            trades: self.trades,
            resolved: self.resolved,
            wins: self.wins,
            win_rate: if self.resolved > 0 {
                self.wins as f64 / self.resolved as f64
            } else {
                0.0
            },
            total_pnl_percent: self.cumulative_pnl,
            sharpe,
            max_drawdown: self.max_drawdown,
            avg_confidence: if self.decisions > 0 {
                self.confidence_sum / self.decisions as f64
            } else {
                0.0
            },
            composite_score: if self.decisions > 0 {
                self.composite_sum / self.decisions as f64
            } else {
                0.0
            },
            rating: self.rating,
        }
    }
}

/// Rolling in-memory aggregates keyed by agent id.
pub struct LeaderboardStore {
    inner: RwLock<HashMap<String, AgentAggregates>>,
}

impl LeaderboardStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Fold one recorded decision into the agent's aggregates.
    pub fn on_decision(&self, agent_id: &str, decision: &TradingDecision, composite: f64) {
        let mut inner = self.inner.write();
        let agg = inner
            .entry(agent_id.to_string())
            .or_insert_with(AgentAggregates::new);
        agg.decisions += 1;
        if !decision.action.is_hold() {
            agg.trades += 1;
        }
        agg.confidence_sum += decision.confidence;
        agg.composite_sum += composite;
    }

    /// Fold one resolved outcome into the agent's aggregates.
    pub fn on_outcome(&self, agent_id: &str, pnl_percent: f64, correct: bool) {
        let mut inner = self.inner.write();
        let agg = inner
            .entry(agent_id.to_string())
            .or_insert_with(AgentAggregates::new);

        agg.resolved += 1;
        if correct {
            agg.wins += 1;
        }

        agg.pnl_samples.push(pnl_percent);
        if agg.pnl_samples.len() > MAX_PNL_SAMPLES {
            agg.pnl_samples.remove(0);
        }

        agg.cumulative_pnl += pnl_percent;
        if agg.cumulative_pnl > agg.peak_pnl {
            agg.peak_pnl = agg.cumulative_pnl;
        }
        let drawdown = agg.peak_pnl - agg.cumulative_pnl;
        if drawdown > agg.max_drawdown {
            agg.max_drawdown = drawdown;
        }

        // ELO-like update against a fixed anchor.
        let expected = 1.0 / (1.0 + 10f64.powf((RATING_ANCHOR - agg.rating) / 400.0));
        let score = if correct { 1.0 } else { 0.0 };
        agg.rating += RATING_K * (score - expected);
    }

    /// Current standing for a single agent.
    pub fn standing(&self, agent_id: &str) -> Option<AgentStanding> {
        self.inner.read().get(agent_id).map(|a| a.standing(agent_id))
    }

    /// All standings sorted descending by `key`, rating as tie-break.
    pub fn standings(&self, key: SortKey, limit: usize) -> Vec<AgentStanding> {
        let inner = self.inner.read();
        let mut rows: Vec<AgentStanding> =
            inner.iter().map(|(id, agg)| agg.standing(id)).collect();

        rows.sort_by(|a, b| {
            let primary = |s: &AgentStanding| match key {
                SortKey::Composite => s.composite_score,
                SortKey::WinRate => s.win_rate,
                SortKey::Pnl => s.total_pnl_percent,
                SortKey::Sharpe => s.sharpe,
                SortKey::Trades => s.trades as f64,
                SortKey::Confidence => s.avg_confidence,
            };
            primary(b)
                .partial_cmp(&primary(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.rating
                        .partial_cmp(&a.rating)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });

        rows.truncate(limit);
        rows
    }
}

impl Default for LeaderboardStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
