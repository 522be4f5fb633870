// =============================================================================
// LLM Provider Abstraction
// =============================================================================
//
// Every agent speaks to its model through `LlmProvider`. The HTTP provider
// targets an OpenAI-compatible chat-completions endpoint; the paper provider
// synthesizes decisions locally so demo deployments run without keys.
// =============================================================================

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use tracing::debug;

/// Upstream model access for an agent.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run one completion and return the raw response text.
    async fn complete(&self, model: &str, prompt: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// HTTP provider (OpenAI-compatible)
// ---------------------------------------------------------------------------

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

pub struct HttpLlmProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpLlmProvider {
    /// Configure from `LLM_API_BASE` / `LLM_API_KEY`.
    pub fn from_env() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("failed to build reqwest client for HttpLlmProvider"),
            base_url: std::env::var("LLM_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            api_key: std::env::var("LLM_API_KEY").unwrap_or_default(),
        }
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0.7,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST chat completion for model {model}"))?;

        let status = resp.status();
        let payload: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse completion response body")?;

        if !status.is_success() {
            anyhow::bail!("provider returned {status}: {payload}");
        }

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .context("completion response missing choices[0].message.content")?;

        debug!(model, chars = content.len(), "completion received");
        Ok(content.to_string())
    }
}

// ---------------------------------------------------------------------------
// Paper provider (demo mode)
// ---------------------------------------------------------------------------

fn prompt_ticker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Z0-9]{2,8}USDT)\b").expect("valid regex"))
}

/// Synthesizes plausible decisions from the prompt's own symbol table.
/// Lets demo deployments exercise the full round pipeline offline.
pub struct PaperProvider;

#[async_trait]
impl LlmProvider for PaperProvider {
    async fn complete(&self, _model: &str, prompt: &str) -> Result<String> {
        let mut symbols: Vec<String> = prompt_ticker_re()
            .captures_iter(prompt)
            .map(|c| c[1].to_string())
            .collect();
        symbols.dedup();

        let mut rng = rand::thread_rng();
        let symbol = symbols
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| "BTCUSDT".to_string());

        let roll: f64 = rng.gen();
        let (action, reasoning, intent) = if roll < 0.35 {
            (
                "buy",
                format!(
                    "Momentum on {symbol} looks constructive because volume is holding up \
                     and the trend structure shows higher lows. However, the position stays \
                     small given mixed breadth. Plan: buy a starter position."
                ),
                "enter",
            )
        } else if roll < 0.55 {
            (
                "sell",
                format!(
                    "{symbol} is stretched into resistance and the bounce is fading; \
                     taking profit here because risk outweighs the remaining upside. \
                     Plan: sell part of the position."
                ),
                "take_profit",
            )
        } else {
            (
                "hold",
                format!(
                    "No clear edge on {symbol} right now; ranges are tight and volume is \
                     thin, so the best trade is to wait for confirmation."
                ),
                "wait",
            )
        };

        let quantity = match action {
            "buy" => (rng.gen_range(50.0..400.0f64) * 100.0).round() / 100.0,
            "sell" => (rng.gen_range(0.01..0.5f64) * 10_000.0).round() / 10_000.0,
            _ => 0.0,
        };
        let confidence = (rng.gen_range(35.0..85.0f64) * 10.0).round() / 10.0;

        Ok(serde_json::json!({
            "action": action,
            "symbol": symbol,
            "quantity": quantity,
            "reasoning": reasoning,
            "confidence": confidence,
            "intent": intent,
            "sources": ["price", "volume"],
        })
        .to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn paper_provider_emits_parseable_json() {
        let provider = PaperProvider;
        let raw = provider
            .complete("paper", "Market: BTCUSDT at 65000, ETHUSDT at 3200")
            .await
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let action = value["action"].as_str().unwrap();
        assert!(["buy", "sell", "hold"].contains(&action));
        let symbol = value["symbol"].as_str().unwrap();
        assert!(symbol == "BTCUSDT" || symbol == "ETHUSDT");
        assert!(value["confidence"].as_f64().unwrap() <= 100.0);
    }

    #[tokio::test]
    async fn paper_provider_hold_carries_zero_quantity() {
        let provider = PaperProvider;
        for _ in 0..40 {
            let raw = provider.complete("paper", "Only BTCUSDT here").await.unwrap();
            let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
            if value["action"] == "hold" {
                assert_eq!(value["quantity"].as_f64().unwrap(), 0.0);
                return;
            }
        }
        panic!("no hold produced in 40 samples");
    }
}
