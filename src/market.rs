// =============================================================================
// Market Data Provider: one consistent snapshot per round
// =============================================================================
//
// The orchestrator calls `snapshot()` exactly once per round and hands the
// result to every agent, so all agents in a round see identical prices.
//
// Live mode reads the venue's 24 h tickers through the rate-limited RPC gate.
// Demo mode advances a local random walk per symbol; no request leaves the
// process, and rounds keep flowing without venue credentials.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use rand::Rng;
use tracing::debug;

use crate::config::ExecutionMode;
use crate::types::{MarketSnapshot, SymbolTick};
use crate::venue::client::VenueClient;
use crate::venue::rate_limit::RateLimitedRpc;

/// Per-symbol random-walk state for demo mode.
struct DemoWalk {
    price: f64,
    day_open: f64,
    volume_24h: f64,
}

/// Produces point-in-time market snapshots for the round pipeline.
pub struct MarketDataProvider {
    mode: ExecutionMode,
    symbols: Vec<String>,
    venue: Arc<VenueClient>,
    rpc: Arc<RateLimitedRpc>,
    demo_walks: RwLock<HashMap<String, DemoWalk>>,
}

impl MarketDataProvider {
    pub fn new(
        mode: ExecutionMode,
        symbols: Vec<String>,
        venue: Arc<VenueClient>,
        rpc: Arc<RateLimitedRpc>,
    ) -> Self {
        let mut walks = HashMap::new();
        for symbol in &symbols {
            let seed = Self::seed_price(symbol);
            walks.insert(
                symbol.clone(),
                DemoWalk {
                    price: seed,
                    day_open: seed,
                    volume_24h: seed * 15_000.0,
                },
            );
        }

        Self {
            mode,
            symbols,
            venue,
            rpc,
            demo_walks: RwLock::new(walks),
        }
    }

    /// Capture a fresh snapshot covering every configured symbol.
    pub async fn snapshot(&self) -> Result<MarketSnapshot> {
        let ticks = match self.mode {
            ExecutionMode::Demo => self.demo_ticks(),
            ExecutionMode::Live => {
                let venue = self.venue.clone();
                let symbols = self.symbols.clone();
                self.rpc
                    .call("market_snapshot", move || {
                        let venue = venue.clone();
                        let symbols = symbols.clone();
                        async move { venue.get_tickers(&symbols).await }
                    })
                    .await
                    .context("market snapshot fetch failed")?
            }
        };

        debug!(symbols = ticks.len(), mode = %self.mode, "market snapshot captured");

        Ok(MarketSnapshot {
            captured_at: chrono::Utc::now().to_rfc3339(),
            ticks,
        })
    }

    /// Current price of a single symbol (used by outcome resolution).
    pub async fn current_price(&self, symbol: &str) -> Result<f64> {
        let snapshot = self.snapshot().await?;
        snapshot
            .price_of(symbol)
            .with_context(|| format!("symbol {symbol} missing from snapshot"))
    }

    // -------------------------------------------------------------------------
    // Demo walk
    // -------------------------------------------------------------------------

    /// Advance every symbol's walk by one small step and emit ticks.
    fn demo_ticks(&self) -> Vec<SymbolTick> {
        let mut rng = rand::thread_rng();
        let mut walks = self.demo_walks.write();

        self.symbols
            .iter()
            .filter_map(|symbol| {
                let walk = walks.get_mut(symbol)?;
                let step: f64 = rng.gen_range(-0.004..0.004);
                walk.price = (walk.price * (1.0 + step)).max(0.000_01);
                walk.volume_24h *= 1.0 + rng.gen_range(-0.02..0.02);

                Some(SymbolTick {
                    symbol: symbol.clone(),
                    price: walk.price,
                    change_24h: walk.price / walk.day_open - 1.0,
                    volume_24h: walk.volume_24h,
                })
            })
            .collect()
    }

    /// Plausible starting price for the demo walk.
    fn seed_price(symbol: &str) -> f64 {
        match symbol {
            "BTCUSDT" => 65_000.0,
            "ETHUSDT" => 3_200.0,
            "SOLUSDT" => 150.0,
            "XRPUSDT" => 0.55,
            "DOGEUSDT" => 0.12,
            "BNBUSDT" => 580.0,
            _ => 10.0,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    fn demo_provider(symbols: &[&str]) -> MarketDataProvider {
        MarketDataProvider::new(
            ExecutionMode::Demo,
            symbols.iter().map(|s| s.to_string()).collect(),
            Arc::new(VenueClient::new("", "")),
            Arc::new(RateLimitedRpc::new(
                5,
                Duration::from_millis(1_000),
                Duration::from_millis(1_000),
            )),
        )
    }

    #[tokio::test]
    async fn demo_snapshot_covers_all_symbols() {
        let provider = demo_provider(&["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
        let snap = provider.snapshot().await.unwrap();
        assert_eq!(snap.ticks.len(), 3);
        assert!(snap.ticks.iter().all(|t| t.price > 0.0));
        assert!(snap.ticks.iter().all(|t| t.volume_24h > 0.0));
    }

    #[tokio::test]
    async fn demo_walk_stays_positive_and_moves() {
        let provider = demo_provider(&["BTCUSDT"]);
        let first = provider.snapshot().await.unwrap().ticks[0].price;
        let mut moved = false;
        for _ in 0..50 {
            let price = provider.snapshot().await.unwrap().ticks[0].price;
            assert!(price > 0.0);
            if (price - first).abs() > f64::EPSILON {
                moved = true;
            }
        }
        assert!(moved, "random walk should move within 50 steps");
    }

    #[tokio::test]
    async fn current_price_errors_on_unknown_symbol() {
        let provider = demo_provider(&["BTCUSDT"]);
        assert!(provider.current_price("BTCUSDT").await.is_ok());
        assert!(provider.current_price("PEPEUSDT").await.is_err());
    }
}
