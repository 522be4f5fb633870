// =============================================================================
// Arena Configuration: hot-loadable settings with env overrides
// =============================================================================
//
// Central configuration hub for the Helios Arena engine. Defaults live here,
// a JSON file (`arena_config.json`) can override them, and the canonical
// environment variables override both:
//
//   BENCHMARK_VERSION, T_ROUND_MS, T_RPC_MS, RATE_LIMIT_MAX,
//   RATE_LIMIT_WINDOW_MS, MAX_EVENTS, MAX_LEDGER_SIZE,
//   MAX_DECISIONS_PER_AGENT
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry serde defaults so adding new fields never breaks
// loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{AgentConfig, TradingStyle};

// =============================================================================
// Execution mode
// =============================================================================

/// Whether orders reach the venue or are simulated locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    Demo,
    Live,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Demo
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo => write!(f, "Demo"),
            Self::Live => write!(f, "Live"),
        }
    }
}

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "SOLUSDT".to_string(),
        "XRPUSDT".to_string(),
        "DOGEUSDT".to_string(),
    ]
}

fn default_benchmark_version() -> String {
    "v24".to_string()
}

fn default_starting_cash() -> f64 {
    10_000.0
}

fn default_round_interval_secs() -> u64 {
    300
}

fn default_outcome_horizon_secs() -> u64 {
    900
}

fn default_t_round_ms() -> u64 {
    30_000
}

fn default_t_rpc_ms() -> u64 {
    10_000
}

fn default_rate_limit_max() -> u32 {
    5
}

fn default_rate_limit_window_ms() -> u64 {
    1_000
}

fn default_max_events() -> usize {
    300
}

fn default_max_ledger_size() -> usize {
    5_000
}

fn default_max_decisions_per_agent() -> usize {
    500
}

fn default_pacing_delay_ms() -> u64 {
    100
}

fn default_catch_up_limit() -> usize {
    20
}

fn default_max_trades_per_window() -> u32 {
    5
}

fn default_velocity_window_secs() -> u64 {
    60
}

fn default_max_position_fraction() -> f64 {
    0.25
}

fn default_loss_streak_halt() -> u32 {
    5
}

fn default_wallet_address() -> String {
    "HELIOS_ARENA_VAULT".to_string()
}

// =============================================================================
// ArenaConfig
// =============================================================================

/// Top-level runtime configuration for the arena engine.
///
/// Every field has a serde default so older JSON files missing new fields
/// still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Demo simulates fills locally; Live submits signed venue orders.
    #[serde(default)]
    pub execution_mode: ExecutionMode,

    /// Symbols every round's snapshot covers.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Version tag stamped on every ledger entry.
    #[serde(default = "default_benchmark_version")]
    pub benchmark_version: String,

    /// Starting cash per agent (USDC).
    #[serde(default = "default_starting_cash")]
    pub starting_cash: f64,

    /// Interval between automatically triggered rounds.
    #[serde(default = "default_round_interval_secs")]
    pub round_interval_secs: u64,

    /// Age at which unresolved outcomes get resolved against live prices.
    #[serde(default = "default_outcome_horizon_secs")]
    pub outcome_horizon_secs: u64,

    // --- Deadlines -----------------------------------------------------------
    /// Hard deadline for an entire round.
    #[serde(default = "default_t_round_ms")]
    pub t_round_ms: u64,

    /// Per-attempt deadline for a venue RPC call.
    #[serde(default = "default_t_rpc_ms")]
    pub t_rpc_ms: u64,

    /// Stagger between agent launches inside a round.
    #[serde(default = "default_pacing_delay_ms")]
    pub pacing_delay_ms: u64,

    // --- Capacities ----------------------------------------------------------
    /// Token-bucket capacity for venue RPC calls.
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: u32,

    /// Token-bucket window.
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,

    /// Stream ring capacity (newest first).
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Ledger capacity before FIFO eviction.
    #[serde(default = "default_max_ledger_size")]
    pub max_ledger_size: usize,

    /// Personality ring capacity per agent.
    #[serde(default = "default_max_decisions_per_agent")]
    pub max_decisions_per_agent: usize,

    /// Historical events replayed to a new stream subscriber.
    #[serde(default = "default_catch_up_limit")]
    pub catch_up_limit: usize,

    // --- Circuit breakers ----------------------------------------------------
    /// Velocity breaker: max trades inside the trailing window.
    #[serde(default = "default_max_trades_per_window")]
    pub max_trades_per_window: u32,

    /// Velocity breaker trailing window.
    #[serde(default = "default_velocity_window_secs")]
    pub velocity_window_secs: u64,

    /// Position-size breaker: max buy notional as a fraction of cash.
    #[serde(default = "default_max_position_fraction")]
    pub max_position_fraction: f64,

    /// Loss-streak breaker: consecutive losses that halt non-hold actions.
    #[serde(default = "default_loss_streak_halt")]
    pub loss_streak_halt: u32,

    /// Arena vault identifier; a decision targeting it is a self-trade.
    #[serde(default = "default_wallet_address")]
    pub wallet_address: String,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Demo,
            symbols: default_symbols(),
            benchmark_version: default_benchmark_version(),
            starting_cash: default_starting_cash(),
            round_interval_secs: default_round_interval_secs(),
            outcome_horizon_secs: default_outcome_horizon_secs(),
            t_round_ms: default_t_round_ms(),
            t_rpc_ms: default_t_rpc_ms(),
            pacing_delay_ms: default_pacing_delay_ms(),
            rate_limit_max: default_rate_limit_max(),
            rate_limit_window_ms: default_rate_limit_window_ms(),
            max_events: default_max_events(),
            max_ledger_size: default_max_ledger_size(),
            max_decisions_per_agent: default_max_decisions_per_agent(),
            catch_up_limit: default_catch_up_limit(),
            max_trades_per_window: default_max_trades_per_window(),
            velocity_window_secs: default_velocity_window_secs(),
            max_position_fraction: default_max_position_fraction(),
            loss_streak_halt: default_loss_streak_halt(),
            wallet_address: default_wallet_address(),
        }
    }
}

impl ArenaConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read arena config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse arena config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            execution_mode = %config.execution_mode,
            "arena config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise arena config")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "arena config saved (atomic)");
        Ok(())
    }

    /// Overlay the canonical environment variables on top of this config.
    ///
    /// Unparseable values are ignored with a warning rather than aborting
    /// startup.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(tag) = std::env::var("BENCHMARK_VERSION") {
            if !tag.trim().is_empty() {
                self.benchmark_version = tag.trim().to_string();
            }
        }

        macro_rules! numeric_override {
            ($env:literal, $field:ident, $ty:ty) => {
                if let Ok(raw) = std::env::var($env) {
                    match raw.trim().parse::<$ty>() {
                        Ok(v) => self.$field = v,
                        Err(e) => {
                            warn!(var = $env, value = %raw, error = %e, "ignoring unparseable env override")
                        }
                    }
                }
            };
        }

        numeric_override!("T_ROUND_MS", t_round_ms, u64);
        numeric_override!("T_RPC_MS", t_rpc_ms, u64);
        numeric_override!("RATE_LIMIT_MAX", rate_limit_max, u32);
        numeric_override!("RATE_LIMIT_WINDOW_MS", rate_limit_window_ms, u64);
        numeric_override!("MAX_EVENTS", max_events, usize);
        numeric_override!("MAX_LEDGER_SIZE", max_ledger_size, usize);
        numeric_override!("MAX_DECISIONS_PER_AGENT", max_decisions_per_agent, usize);
    }
}

// =============================================================================
// Default roster
// =============================================================================

/// Return the default set of arena agents.
///
/// Four heterogeneous personalities across providers; a deployment overrides
/// this via `agents.json` next to the arena config.
pub fn default_roster() -> Vec<AgentConfig> {
    vec![
        AgentConfig {
            agent_id: "atlas".to_string(),
            name: "Atlas".to_string(),
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            trading_style: TradingStyle::Conservative,
            risk_tolerance: 0.3,
            preferred_symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            call_budget_per_round: 50,
        },
        AgentConfig {
            agent_id: "borealis".to_string(),
            name: "Borealis".to_string(),
            provider: "anthropic".to_string(),
            model: "claude-3-5-sonnet-latest".to_string(),
            trading_style: TradingStyle::Aggressive,
            risk_tolerance: 0.8,
            preferred_symbols: vec!["SOLUSDT".to_string(), "DOGEUSDT".to_string()],
            call_budget_per_round: 50,
        },
        AgentConfig {
            agent_id: "cipher".to_string(),
            name: "Cipher".to_string(),
            provider: "xai".to_string(),
            model: "grok-2-latest".to_string(),
            trading_style: TradingStyle::Contrarian,
            risk_tolerance: 0.6,
            preferred_symbols: vec!["XRPUSDT".to_string()],
            call_budget_per_round: 50,
        },
        AgentConfig {
            agent_id: "dynamo".to_string(),
            name: "Dynamo".to_string(),
            provider: "google".to_string(),
            model: "gemini-1.5-pro".to_string(),
            trading_style: TradingStyle::Aggressive,
            risk_tolerance: 0.7,
            preferred_symbols: vec!["ETHUSDT".to_string(), "SOLUSDT".to_string()],
            call_budget_per_round: 50,
        },
    ]
}

/// Load the agent roster from `path`, falling back to the default roster.
pub fn load_roster(path: impl AsRef<Path>) -> Vec<AgentConfig> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<Vec<AgentConfig>>(&content) {
            Ok(roster) if !roster.is_empty() => {
                info!(path = %path.display(), agents = roster.len(), "agent roster loaded");
                roster
            }
            Ok(_) => {
                warn!(path = %path.display(), "agent roster file is empty, using defaults");
                default_roster()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse roster, using defaults");
                default_roster()
            }
        },
        Err(_) => default_roster(),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = ArenaConfig::default();
        assert_eq!(cfg.execution_mode, ExecutionMode::Demo);
        assert_eq!(cfg.symbols.len(), 5);
        assert_eq!(cfg.benchmark_version, "v24");
        assert_eq!(cfg.t_round_ms, 30_000);
        assert_eq!(cfg.t_rpc_ms, 10_000);
        assert_eq!(cfg.rate_limit_max, 5);
        assert_eq!(cfg.rate_limit_window_ms, 1_000);
        assert_eq!(cfg.max_events, 300);
        assert_eq!(cfg.max_ledger_size, 5_000);
        assert_eq!(cfg.max_decisions_per_agent, 500);
        assert_eq!(cfg.catch_up_limit, 20);
        assert!((cfg.max_position_fraction - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: ArenaConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.execution_mode, ExecutionMode::Demo);
        assert_eq!(cfg.max_trades_per_window, 5);
        assert_eq!(cfg.loss_streak_halt, 5);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "execution_mode": "Live", "symbols": ["ETHUSDT"], "max_events": 250 }"#;
        let cfg: ArenaConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.execution_mode, ExecutionMode::Live);
        assert_eq!(cfg.symbols, vec!["ETHUSDT"]);
        assert_eq!(cfg.max_events, 250);
        assert_eq!(cfg.max_ledger_size, 5_000);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = ArenaConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: ArenaConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.max_ledger_size, cfg2.max_ledger_size);
        assert_eq!(cfg.execution_mode, cfg2.execution_mode);
    }

    #[test]
    fn default_roster_unique_ids() {
        let roster = default_roster();
        assert_eq!(roster.len(), 4);
        let mut ids: Vec<&str> = roster.iter().map(|a| a.agent_id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), roster.len());
        assert!(roster.iter().all(|a| a.call_budget_per_round == 50));
    }
}
