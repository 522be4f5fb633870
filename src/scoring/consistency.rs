// =============================================================================
// Consistency Analyzer: does the agent whipsaw its own positions?
// =============================================================================
//
// Tracks the sequence of non-hold actions per (agent, symbol). A direct
// reversal between consecutive decisions on the same symbol (buy then sell,
// or sell then buy) counts against the agent; the score is the fraction of
// consecutive same-symbol pairs that did not reverse.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;

use crate::types::TradeAction;

/// Recent non-hold actions retained per agent.
const MAX_OBSERVED: usize = 50;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    /// 1.0 when the agent never reverses itself; drops toward 0 as direct
    /// reversals dominate.
    pub score: f64,
    pub reversals: usize,
    pub comparable_pairs: usize,
}

pub struct ConsistencyTracker {
    inner: RwLock<HashMap<String, VecDeque<(String, TradeAction)>>>,
}

impl ConsistencyTracker {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Record one non-hold action. Holds are ignored; they are not a stance.
    pub fn observe(&self, agent_id: &str, symbol: &str, action: TradeAction) {
        if action.is_hold() {
            return;
        }
        let mut inner = self.inner.write();
        let history = inner.entry(agent_id.to_string()).or_default();
        history.push_back((symbol.to_string(), action));
        while history.len() > MAX_OBSERVED {
            history.pop_front();
        }
    }

    pub fn report(&self, agent_id: &str) -> ConsistencyReport {
        let inner = self.inner.read();
        let Some(history) = inner.get(agent_id) else {
            return ConsistencyReport {
                score: 1.0,
                reversals: 0,
                comparable_pairs: 0,
            };
        };

        let mut last_by_symbol: HashMap<&str, TradeAction> = HashMap::new();
        let mut pairs = 0usize;
        let mut reversals = 0usize;
        for (symbol, action) in history {
            if let Some(prev) = last_by_symbol.get(symbol.as_str()) {
                pairs += 1;
                if *prev != *action {
                    reversals += 1;
                }
            }
            last_by_symbol.insert(symbol.as_str(), *action);
        }

        ConsistencyReport {
            score: if pairs > 0 {
                1.0 - reversals as f64 / pairs as f64
            } else {
                1.0
            },
            reversals,
            comparable_pairs: pairs,
        }
    }
}

impl Default for ConsistencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
