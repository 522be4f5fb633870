// =============================================================================
// Prompt construction and decision extraction
// =============================================================================
//
// The prompt carries the round snapshot, the agent's portfolio, cached news,
// and the response schema. Extraction is strict-then-permissive: a clean
// JSON document parses directly; otherwise the first balanced JSON object in
// the response is recovered and read field-by-field. Failures are returned
// as errors, never panics; the runner converts them into a hold.
// =============================================================================

use anyhow::{anyhow, Context, Result};

use crate::types::{
    AgentConfig, MarketSnapshot, PortfolioContext, TradeAction, TradingDecision, TradingStyle,
};

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

fn style_brief(style: TradingStyle) -> &'static str {
    match style {
        TradingStyle::Conservative => {
            "You are a conservative trader. Protect capital first, size small, \
             and prefer holding over marginal setups."
        }
        TradingStyle::Aggressive => {
            "You are an aggressive trader. Seek momentum and act decisively when \
             the tape confirms, accepting larger swings."
        }
        TradingStyle::Contrarian => {
            "You are a contrarian trader. Fade crowded moves and look for spots \
             where consensus is most likely wrong."
        }
    }
}

/// Render the full prompt for one agent in one round.
pub fn build_prompt(
    agent: &AgentConfig,
    snapshot: &MarketSnapshot,
    portfolio: &PortfolioContext,
    news_block: &str,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(style_brief(agent.trading_style));
    prompt.push_str(&format!(
        "\nRisk tolerance: {:.1} of 1.0.\n",
        agent.risk_tolerance
    ));
    if !agent.preferred_symbols.is_empty() {
        prompt.push_str(&format!(
            "You gravitate toward: {}.\n",
            agent.preferred_symbols.join(", ")
        ));
    }

    prompt.push_str("\nMarket snapshot:\n");
    for tick in &snapshot.ticks {
        prompt.push_str(&format!(
            "  {}: price {:.6}, 24h change {:+.2}%, 24h volume {:.0}\n",
            tick.symbol,
            tick.price,
            tick.change_24h * 100.0,
            tick.volume_24h
        ));
    }

    prompt.push_str(&format!(
        "\nYour portfolio: cash {:.2} USDC, total value {:.2} USDC, total P&L {:+.2}%\n",
        portfolio.cash_balance, portfolio.total_value, portfolio.total_pnl_percent
    ));
    for pos in &portfolio.positions {
        prompt.push_str(&format!(
            "  {}: {:.6} units at avg cost {:.6} ({:+.2}% unrealized)\n",
            pos.symbol, pos.quantity, pos.avg_cost, pos.unrealized_pnl_percent
        ));
    }

    if !news_block.is_empty() {
        prompt.push('\n');
        prompt.push_str(news_block);
    }

    prompt.push_str(
        "\nDecide on exactly one action this round. Respond with a single JSON object:\n\
         {\n\
           \"action\": \"buy\" | \"sell\" | \"hold\",\n\
           \"symbol\": \"<one symbol from the snapshot>\",\n\
           \"quantity\": <USDC notional for buy, unit quantity for sell, 0 for hold>,\n\
           \"reasoning\": \"<your full reasoning>\",\n\
           \"confidence\": <0-100>,\n\
           \"intent\": \"<short intent label>\",\n\
           \"sources\": [\"<evidence categories you used>\"],\n\
           \"predictedOutcome\": \"<optional price expectation>\"\n\
         }\n",
    );

    prompt
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Extract one `TradingDecision` from a raw model response.
pub fn parse_decision(raw: &str, fallback_symbol: &str) -> Result<TradingDecision> {
    let value: serde_json::Value = match serde_json::from_str(raw.trim()) {
        Ok(v) => v,
        // Permissive recovery: first balanced JSON object in the text.
        Err(_) => {
            let block = extract_json_block(raw)
                .ok_or_else(|| anyhow!("no JSON object found in response"))?;
            serde_json::from_str(&block).context("recovered block is not valid JSON")?
        }
    };

    let obj = value
        .as_object()
        .ok_or_else(|| anyhow!("response JSON is not an object"))?;

    let action = match obj
        .get("action")
        .and_then(|v| v.as_str())
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("buy") => TradeAction::Buy,
        Some("sell") => TradeAction::Sell,
        Some("hold") => TradeAction::Hold,
        Some(other) => return Err(anyhow!("unknown action '{other}'")),
        None => return Err(anyhow!("response missing 'action'")),
    };

    let symbol = obj
        .get("symbol")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback_symbol.to_string());

    let quantity = lenient_f64(obj.get("quantity")).unwrap_or(0.0).max(0.0);
    let confidence = lenient_f64(obj.get("confidence"))
        .unwrap_or(50.0)
        .clamp(0.0, 100.0);

    let reasoning = obj
        .get("reasoning")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();

    let intent = obj
        .get("intent")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| action.as_str().to_string());

    let sources = obj
        .get("sources")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|s| s.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let predicted_outcome = obj
        .get("predictedOutcome")
        .or_else(|| obj.get("predicted_outcome"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Ok(TradingDecision {
        action,
        symbol,
        quantity: if action.is_hold() { 0.0 } else { quantity },
        reasoning,
        confidence,
        intent,
        sources,
        predicted_outcome,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Numbers arrive as JSON numbers or quoted strings; accept both.
fn lenient_f64(value: Option<&serde_json::Value>) -> Option<f64> {
    let value = value?;
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// First balanced `{...}` block in `text`, respecting string literals.
fn extract_json_block(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=start + i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SymbolTick;

    fn agent() -> AgentConfig {
        AgentConfig {
            agent_id: "atlas".into(),
            name: "Atlas".into(),
            provider: "openai".into(),
            model: "gpt-4o".into(),
            trading_style: TradingStyle::Contrarian,
            risk_tolerance: 0.6,
            preferred_symbols: vec!["BTCUSDT".into()],
            call_budget_per_round: 50,
        }
    }

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
            captured_at: chrono::Utc::now().to_rfc3339(),
            ticks: vec![SymbolTick {
                symbol: "BTCUSDT".into(),
                price: 65_000.0,
                change_24h: 0.015,
                volume_24h: 1.0e9,
            }],
        }
    }

    #[test]
    fn prompt_contains_market_portfolio_and_schema() {
        let prompt = build_prompt(
            &agent(),
            &snapshot(),
            &PortfolioContext::with_cash(10_000.0),
            "Recent headlines:\n  BTCUSDT:\n    - ETF inflows (desk)\n",
        );
        assert!(prompt.contains("contrarian"));
        assert!(prompt.contains("BTCUSDT: price 65000"));
        assert!(prompt.contains("+1.50%"));
        assert!(prompt.contains("cash 10000.00 USDC"));
        assert!(prompt.contains("ETF inflows"));
        assert!(prompt.contains("\"action\": \"buy\" | \"sell\" | \"hold\""));
    }

    #[test]
    fn strict_parse_of_clean_json() {
        let raw = r#"{
            "action": "buy",
            "symbol": "btcusdt",
            "quantity": 250.0,
            "reasoning": "support held",
            "confidence": 72,
            "intent": "enter",
            "sources": ["price"],
            "predictedOutcome": "up 2%"
        }"#;
        let d = parse_decision(raw, "ETHUSDT").unwrap();
        assert_eq!(d.action, TradeAction::Buy);
        assert_eq!(d.symbol, "BTCUSDT");
        assert_eq!(d.quantity, 250.0);
        assert_eq!(d.confidence, 72.0);
        assert_eq!(d.predicted_outcome.as_deref(), Some("up 2%"));
    }

    #[test]
    fn permissive_parse_recovers_embedded_json() {
        let raw = "Sure! Here's my decision:\n```json\n\
                   {\"action\": \"sell\", \"symbol\": \"BTCUSDT\", \"quantity\": \"0.5\", \
                    \"reasoning\": \"taking profit {at resistance}\", \"confidence\": \"64.5\"}\
                   \n```\nGood luck!";
        let d = parse_decision(raw, "ETHUSDT").unwrap();
        assert_eq!(d.action, TradeAction::Sell);
        assert_eq!(d.quantity, 0.5);
        assert_eq!(d.confidence, 64.5);
        assert!(d.reasoning.contains("{at resistance}"));
    }

    #[test]
    fn missing_fields_get_safe_defaults() {
        let d = parse_decision(r#"{"action": "hold"}"#, "ETHUSDT").unwrap();
        assert_eq!(d.action, TradeAction::Hold);
        assert_eq!(d.symbol, "ETHUSDT");
        assert_eq!(d.quantity, 0.0);
        assert_eq!(d.confidence, 50.0);
        assert_eq!(d.intent, "hold");
    }

    #[test]
    fn hold_quantity_is_forced_to_zero() {
        let d = parse_decision(
            r#"{"action": "hold", "quantity": 500, "reasoning": "waiting for a clean setup"}"#,
            "BTCUSDT",
        )
        .unwrap();
        assert_eq!(d.quantity, 0.0);
    }

    #[test]
    fn out_of_range_confidence_is_clamped() {
        let d = parse_decision(
            r#"{"action": "buy", "symbol": "BTCUSDT", "quantity": 10, "confidence": 180}"#,
            "BTCUSDT",
        )
        .unwrap();
        assert_eq!(d.confidence, 100.0);
    }

    #[test]
    fn garbage_and_unknown_actions_error() {
        assert!(parse_decision("the market is nice today", "BTCUSDT").is_err());
        assert!(parse_decision(r#"{"action": "yolo"}"#, "BTCUSDT").is_err());
        assert!(parse_decision(r#"[1, 2, 3]"#, "BTCUSDT").is_err());
    }
}
