// =============================================================================
// Intent Taxonomy: classify each decision into a closed intent set
// =============================================================================

use serde::Serialize;

use crate::types::{TradeAction, TradingDecision};

/// Closed intent categories.
pub const CATEGORIES: [&str; 8] = [
    "entry",
    "exit",
    "take_profit",
    "stop_loss",
    "rebalance",
    "hedge",
    "speculation",
    "wait",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxonomyReport {
    pub category: &'static str,
    pub matched_cues: Vec<String>,
}

/// Keyword rules over intent and reasoning, with the action as fallback.
pub fn classify(decision: &TradingDecision) -> TaxonomyReport {
    let text = format!("{} {}", decision.intent, decision.reasoning).to_lowercase();
    let mut matched_cues = Vec::new();

    let rules: [(&str, &[&str]); 5] = [
        ("take_profit", &["take profit", "take_profit", "taking profit", "lock in"]),
        ("stop_loss", &["stop loss", "stop_loss", "cut the loss", "cutting losses"]),
        ("rebalance", &["rebalance", "rebalancing", "reweight"]),
        ("hedge", &["hedge", "hedging", "offset exposure"]),
        ("speculation", &["moonshot", "gamble", "punt", "lottery"]),
    ];

    for (category, cues) in rules {
        for cue in cues {
            if text.contains(cue) {
                matched_cues.push(cue.to_string());
                return TaxonomyReport {
                    category,
                    matched_cues,
                };
            }
        }
    }

    let category = match decision.action {
        TradeAction::Buy => "entry",
        TradeAction::Sell => "exit",
        TradeAction::Hold => "wait",
    };
    TaxonomyReport {
        category,
        matched_cues,
    }
}

// =============================================================================
// Tests
// =============================================================================
