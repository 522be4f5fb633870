// =============================================================================
// Agent Runner: one agent, one round, one decision
// =============================================================================
//
// The runner builds the prompt, calls the model through the provider
// abstraction, and parses exactly one `TradingDecision`. Every expected
// failure on this path (budget exhausted, deadline, provider error, parse
// failure) degrades to a synthetic hold whose reasoning captures the cause;
// nothing here throws into the orchestrator.
// =============================================================================

pub mod prompt;
pub mod provider;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::time::Duration;
use tracing::{debug, warn};

use crate::types::{AgentConfig, MarketSnapshot, PortfolioContext, TradingDecision};

use provider::LlmProvider;

// ---------------------------------------------------------------------------
// Call budget
// ---------------------------------------------------------------------------

/// Per-(agent, round) LLM invocation budget.
pub struct CallBudget {
    limit: u32,
    used: AtomicU32,
}

impl CallBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            used: AtomicU32::new(0),
        }
    }

    /// Claim one invocation; `false` once the budget is spent.
    pub fn try_consume(&self) -> bool {
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.limit).then_some(used + 1)
            })
            .is_ok()
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct AgentRunner {
    provider: Arc<dyn LlmProvider>,
}

impl AgentRunner {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    /// Produce this agent's decision for the round.
    pub async fn run(
        &self,
        agent: &AgentConfig,
        snapshot: &MarketSnapshot,
        portfolio: &PortfolioContext,
        news_block: &str,
        deadline: Duration,
        budget: &CallBudget,
    ) -> TradingDecision {
        let fallback_symbol = agent
            .preferred_symbols
            .first()
            .cloned()
            .or_else(|| snapshot.ticks.first().map(|t| t.symbol.clone()))
            .unwrap_or_else(|| "BTCUSDT".to_string());

        if !budget.try_consume() {
            warn!(agent = %agent.agent_id, limit = budget.limit, "call budget exhausted");
            return TradingDecision::hold(
                fallback_symbol,
                format!(
                    "call budget exhausted: {} invocations already spent this round",
                    budget.limit
                ),
            );
        }

        let prompt = prompt::build_prompt(agent, snapshot, portfolio, news_block);
        debug!(agent = %agent.agent_id, model = %agent.model, "invoking provider");

        let raw = match tokio::time::timeout(
            deadline,
            self.provider.complete(&agent.model, &prompt),
        )
        .await
        {
            Err(_) => {
                warn!(agent = %agent.agent_id, deadline_ms = deadline.as_millis() as u64, "agent deadline exceeded");
                return TradingDecision::hold(
                    fallback_symbol,
                    format!("deadline exceeded after {} ms", deadline.as_millis()),
                );
            }
            Ok(Err(e)) => {
                warn!(agent = %agent.agent_id, error = %e, "provider call failed");
                return TradingDecision::hold(
                    fallback_symbol,
                    format!("provider error: {e:#}"),
                );
            }
            Ok(Ok(raw)) => raw,
        };

        match prompt::parse_decision(&raw, &fallback_symbol) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(agent = %agent.agent_id, error = %e, "decision parse failed");
                TradingDecision::hold(
                    fallback_symbol,
                    format!("unparseable response: {e:#}"),
                )
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
