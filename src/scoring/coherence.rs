// =============================================================================
// Coherence Analyzer: does the reasoning point the same way as the action?
// =============================================================================
//
// Stateless lexical check. Bullish language supporting a buy (or bearish
// supporting a sell) raises the score; language fighting the action lowers
// it. Holds are most coherent when the language is balanced.
// =============================================================================

use serde::Serialize;

use crate::types::{TradeAction, TradingDecision};

const BULLISH_CUES: [&str; 12] = [
    "bullish",
    "rally",
    "breakout",
    "uptrend",
    "momentum building",
    "accumulate",
    "oversold",
    "undervalued",
    "inflows",
    "upside",
    "higher lows",
    "support holding",
];

const BEARISH_CUES: [&str; 12] = [
    "bearish",
    "dump",
    "breakdown",
    "downtrend",
    "overbought",
    "distribution",
    "sell-off",
    "selloff",
    "outflows",
    "downside",
    "lower highs",
    "resistance rejected",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoherenceReport {
    /// Reasoning-to-action alignment in [0, 1].
    pub score: f64,
    pub explanation: String,
}

/// Score one decision's reasoning against its action.
pub fn evaluate(decision: &TradingDecision) -> CoherenceReport {
    let text = decision.reasoning.to_lowercase();

    let bullish = BULLISH_CUES.iter().filter(|c| text.contains(*c)).count() as i32;
    let bearish = BEARISH_CUES.iter().filter(|c| text.contains(*c)).count() as i32;
    let net = bullish - bearish;

    let score = match decision.action {
        TradeAction::Buy => 0.5 + 0.15 * net as f64,
        TradeAction::Sell => 0.5 - 0.15 * net as f64,
        // A hold argued with strongly one-sided language is less coherent.
        TradeAction::Hold => 0.8 - 0.1 * net.abs() as f64,
    }
    .clamp(0.0, 1.0);

    let explanation = format!(
        "{} with {} bullish / {} bearish cue(s)",
        decision.action, bullish, bearish
    );

    CoherenceReport { score, explanation }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradeAction;

    fn decision(action: TradeAction, reasoning: &str) -> TradingDecision {
        let mut d = TradingDecision::hold("BTCUSDT", reasoning);
        d.action = action;
        d
    }

    #[test]
    fn bullish_buy_scores_high() {
        let r = evaluate(&decision(
            TradeAction::Buy,
            "Clean breakout on strong inflows; uptrend intact with higher lows.",
        ));
        assert!(r.score > 0.8, "score was {}", r.score);
    }

    #[test]
    fn bearish_buy_scores_low() {
        let r = evaluate(&decision(
            TradeAction::Buy,
            "Breakdown below support, heavy outflows, clear downtrend.",
        ));
        assert!(r.score < 0.2, "score was {}", r.score);
    }

    #[test]
    fn bearish_sell_scores_high() {
        let r = evaluate(&decision(
            TradeAction::Sell,
            "Overbought into resistance rejected; distribution and sell-off risk.",
        ));
        assert!(r.score > 0.8);
    }

    #[test]
    fn balanced_hold_scores_high() {
        let r = evaluate(&decision(
            TradeAction::Hold,
            "Mixed picture, waiting for confirmation either way.",
        ));
        assert!((r.score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn one_sided_hold_scores_lower() {
        let balanced = evaluate(&decision(TradeAction::Hold, "No clear signal."));
        let lopsided = evaluate(&decision(
            TradeAction::Hold,
            "Massive bullish breakout with huge inflows and a clean uptrend.",
        ));
        assert!(lopsided.score < balanced.score);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let r = evaluate(&decision(
            TradeAction::Sell,
            "bullish rally breakout uptrend accumulate oversold undervalued \
             inflows upside higher lows support holding momentum building",
        ));
        assert!(r.score >= 0.0 && r.score <= 1.0);
    }
}
