// =============================================================================
// Reasoning Depth Analyzer
// =============================================================================
//
// Six sub-scores, each in [0, 1], composed as a fixed weighted sum:
//
//   steps 0.20, connectives 0.15, evidence 0.25, counter-argument 0.15,
//   conclusion 0.10, vocabulary 0.15
// =============================================================================

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::types::TradingDecision;

const CONNECTIVES: [&str; 12] = [
    "because",
    "therefore",
    "however",
    "since",
    "thus",
    "given",
    "as a result",
    "consequently",
    "although",
    "despite",
    "which means",
    "so that",
];

const COUNTER_CUES: [&str; 7] = [
    "however",
    "on the other hand",
    "the risk is",
    "downside risk",
    "could fail",
    "invalidation",
    "if wrong",
];

const CONCLUSION_CUES: [&str; 8] = [
    "buy", "sell", "hold", "enter", "exit", "wait", "stay", "take",
];

fn evidence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\$\d|\d+(?:\.\d+)?\s?%|\b(rsi|macd|ema|sma|vwap|atr|volume|support|resistance)\b")
            .expect("valid regex")
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthReport {
    pub score: f64,
    pub steps: f64,
    pub connectives: f64,
    pub evidence: f64,
    pub counter_argument: f64,
    pub conclusion: f64,
    pub vocabulary: f64,
}

pub fn evaluate(decision: &TradingDecision) -> DepthReport {
    let text = decision.reasoning.trim();
    let lower = text.to_lowercase();

    if text.is_empty() {
        return DepthReport {
            score: 0.0,
            steps: 0.0,
            connectives: 0.0,
            evidence: 0.0,
            counter_argument: 0.0,
            conclusion: 0.0,
            vocabulary: 0.0,
        };
    }

    // Step count: sentences up to five.
    let sentences: Vec<&str> = text
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let steps = (sentences.len() as f64 / 5.0).min(1.0);

    // Logical-connective density.
    let connective_hits = CONNECTIVES.iter().filter(|c| lower.contains(*c)).count();
    let connectives = (connective_hits as f64 / 4.0).min(1.0);

    // Evidence anchors: dollars, percents, indicator tokens.
    let evidence_hits = evidence_re().find_iter(text).count();
    let evidence = (evidence_hits as f64 / 4.0).min(1.0);

    // Counter-argument presence.
    let counter_argument = if COUNTER_CUES.iter().any(|c| lower.contains(*c)) {
        1.0
    } else {
        0.0
    };

    // Conclusion clarity: the final sentence names an action.
    let conclusion = sentences
        .last()
        .map(|s| {
            let last = s.to_lowercase();
            if CONCLUSION_CUES.iter().any(|c| last.contains(*c)) {
                1.0
            } else {
                0.0
            }
        })
        .unwrap_or(0.0);

    // Vocabulary richness: type-token ratio scaled so 0.7 is full marks.
    let words: Vec<&str> = lower.split_whitespace().collect();
    let unique: HashSet<&str> = words.iter().copied().collect();
    let ttr = unique.len() as f64 / words.len() as f64;
    let vocabulary = (ttr / 0.7).min(1.0);

    let score = 0.20 * steps
        + 0.15 * connectives
        + 0.25 * evidence
        + 0.15 * counter_argument
        + 0.10 * conclusion
        + 0.15 * vocabulary;

    DepthReport {
        score,
        steps,
        connectives,
        evidence,
        counter_argument,
        conclusion,
        vocabulary,
    }
}

// =============================================================================
// Tests
// =============================================================================
