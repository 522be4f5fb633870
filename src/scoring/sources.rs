// =============================================================================
// Source Quality Analyzer: what evidence categories back the decision?
// =============================================================================
//
// Composite = 0.40 * category breadth + 0.25 * specificity
//           + 0.15 * cross-reference + 0.20 * integration
// =============================================================================

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::types::TradingDecision;

/// Evidence categories and their detection patterns.
const CATEGORY_PATTERNS: [(&str, &str); 10] = [
    ("price", r"(?i)\b(price|support|resistance|level|breakout)\b"),
    ("volume", r"(?i)\b(volume|liquidity|turnover)\b"),
    ("news", r"(?i)\b(news|headline|announc\w*|report(?:ed|s)?)\b"),
    (
        "technical",
        r"(?i)\b(rsi|macd|ema|sma|bollinger|vwap|atr|indicator|moving average)\b",
    ),
    (
        "portfolio",
        r"(?i)\b(portfolio|position|balance|exposure|cash|allocation)\b",
    ),
    ("sentiment", r"(?i)\b(sentiment|fear|greed|social|crowd)\b"),
    ("peer", r"(?i)\b(peer|other agents?|consensus|majority)\b"),
    ("risk", r"(?i)\b(risk|drawdown|stop[- ]loss|invalidation)\b"),
    ("macro", r"(?i)\b(fed|rates?|inflation|macro|cpi|etf|treasury)\b"),
    (
        "fundamental",
        r"(?i)\b(fundamentals?|adoption|on-?chain|tvl|network activity)\b",
    ),
];

fn category_regexes() -> &'static Vec<(&'static str, Regex)> {
    static RES: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    RES.get_or_init(|| {
        CATEGORY_PATTERNS
            .iter()
            .map(|(name, pat)| (*name, Regex::new(pat).expect("valid regex")))
            .collect()
    })
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid regex"))
}

const CROSS_REFERENCE_CUES: [&str; 5] = [
    "consistent with",
    "confirmed by",
    "aligns with",
    "corroborat",
    "matches the",
];

const INTEGRATION_CUES: [&str; 5] = [
    "combining",
    "taken together",
    "overall",
    "on balance",
    "weighing",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceQualityReport {
    pub score: f64,
    pub categories: Vec<String>,
    pub specificity: usize,
    pub cross_reference: bool,
    pub integration: bool,
}

pub fn evaluate(decision: &TradingDecision) -> SourceQualityReport {
    // Cited sources count toward the same evidence pool as the prose.
    let text = format!("{} {}", decision.reasoning, decision.sources.join(" "));
    let lower = text.to_lowercase();

    let categories: Vec<String> = category_regexes()
        .iter()
        .filter(|(_, re)| re.is_match(&text))
        .map(|(name, _)| name.to_string())
        .collect();

    let specificity = number_re().find_iter(&text).count();
    let cross_reference = CROSS_REFERENCE_CUES.iter().any(|c| lower.contains(c));
    let integration = INTEGRATION_CUES.iter().any(|c| lower.contains(c));

    let score = 0.40 * (categories.len() as f64 / 5.0).min(1.0)
        + 0.25 * (specificity as f64 / 6.0).min(1.0)
        + 0.15 * if cross_reference { 1.0 } else { 0.0 }
        + 0.20 * if integration { 1.0 } else { 0.0 };

    SourceQualityReport {
        score,
        categories,
        specificity,
        cross_reference,
        integration,
    }
}

// =============================================================================
// Tests
// =============================================================================
