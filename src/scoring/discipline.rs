// =============================================================================
// Discipline Analyzer: structural hygiene of a decision
// =============================================================================

use serde::Serialize;

use crate::types::{TradeAction, TradingDecision};

/// Minimum characters for a hold to count as justified.
const MIN_HOLD_JUSTIFICATION: usize = 20;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisciplineReport {
    pub passed: bool,
    pub violations: Vec<String>,
}

/// Check required fields, quantity bounds, and hold justification.
pub fn evaluate(decision: &TradingDecision) -> DisciplineReport {
    let mut violations = Vec::new();

    if decision.symbol.trim().is_empty() {
        violations.push("missing symbol".to_string());
    }
    if decision.intent.trim().is_empty() {
        violations.push("missing intent".to_string());
    }
    if decision.reasoning.trim().is_empty() {
        violations.push("missing reasoning".to_string());
    }

    if !(0.0..=100.0).contains(&decision.confidence) {
        violations.push(format!(
            "confidence {} outside [0, 100]",
            decision.confidence
        ));
    }

    match decision.action {
        TradeAction::Hold => {
            if decision.quantity != 0.0 {
                violations.push(format!("hold carries quantity {}", decision.quantity));
            }
            if decision.reasoning.trim().len() < MIN_HOLD_JUSTIFICATION
                && !decision.reasoning.trim().is_empty()
            {
                violations.push("hold justification too short".to_string());
            }
        }
        TradeAction::Buy | TradeAction::Sell => {
            if decision.quantity <= 0.0 {
                violations.push(format!(
                    "{} with non-positive quantity {}",
                    decision.action, decision.quantity
                ));
            }
            if !decision.quantity.is_finite() {
                violations.push("quantity is not finite".to_string());
            }
        }
    }

    DisciplineReport {
        passed: violations.is_empty(),
        violations,
    }
}

// =============================================================================
// Tests
// =============================================================================
