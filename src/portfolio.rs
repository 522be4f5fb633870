// =============================================================================
// Portfolio reconstruction from executed fills
// =============================================================================
//
// Each agent starts every round with a freshly computed `PortfolioContext`:
// replay that agent's executed fills against starting cash, then mark open
// positions to the round snapshot's prices. The fill history itself is the
// in-memory record of everything that actually executed at the venue (or was
// simulated in demo mode).
// =============================================================================

use parking_lot::RwLock;
use serde::Serialize;

use crate::types::{MarketSnapshot, PortfolioContext, PortfolioPosition, TradeAction};

/// One executed (or simulated) fill.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    pub agent_id: String,
    pub symbol: String,
    pub action: TradeAction,
    /// Base units bought or sold.
    pub quantity: f64,
    /// Quote notional exchanged.
    pub notional: f64,
    pub price: f64,
    pub timestamp: String,
}

/// Append-only executed-trade history, replayed to build portfolios.
pub struct FillStore {
    starting_cash: f64,
    fills: RwLock<Vec<Fill>>,
}

impl FillStore {
    pub fn new(starting_cash: f64) -> Self {
        Self {
            starting_cash,
            fills: RwLock::new(Vec::new()),
        }
    }

    pub fn record(&self, fill: Fill) {
        self.fills.write().push(fill);
    }

    pub fn fills_for(&self, agent_id: &str) -> Vec<Fill> {
        self.fills
            .read()
            .iter()
            .filter(|f| f.agent_id == agent_id)
            .cloned()
            .collect()
    }

    /// Replay an agent's fills and mark to the snapshot's prices.
    pub fn portfolio_for(&self, agent_id: &str, snapshot: &MarketSnapshot) -> PortfolioContext {
        struct Holding {
            quantity: f64,
            cost_basis: f64,
        }

        let mut cash = self.starting_cash;
        let mut holdings: std::collections::HashMap<String, Holding> =
            std::collections::HashMap::new();

        for fill in self.fills.read().iter().filter(|f| f.agent_id == agent_id) {
            match fill.action {
                TradeAction::Buy => {
                    cash -= fill.notional;
                    let h = holdings.entry(fill.symbol.clone()).or_insert(Holding {
                        quantity: 0.0,
                        cost_basis: 0.0,
                    });
                    h.quantity += fill.quantity;
                    h.cost_basis += fill.notional;
                }
                TradeAction::Sell => {
                    cash += fill.notional;
                    if let Some(h) = holdings.get_mut(&fill.symbol) {
                        // Release cost basis proportionally to the units sold.
                        let sold = fill.quantity.min(h.quantity);
                        if h.quantity > 0.0 {
                            h.cost_basis -= h.cost_basis * (sold / h.quantity);
                        }
                        h.quantity -= sold;
                    }
                }
                TradeAction::Hold => {}
            }
        }

        let mut positions = Vec::new();
        let mut market_value = 0.0;
        for (symbol, holding) in holdings {
            if holding.quantity <= 1e-12 {
                continue;
            }
            let avg_cost = holding.cost_basis / holding.quantity;
            let current_price = snapshot.price_of(&symbol).unwrap_or(avg_cost);
            let value = holding.quantity * current_price;
            let unrealized = value - holding.cost_basis;
            market_value += value;

            positions.push(PortfolioPosition {
                symbol,
                quantity: holding.quantity,
                avg_cost,
                current_price,
                unrealized_pnl: unrealized,
                unrealized_pnl_percent: if holding.cost_basis > 0.0 {
                    unrealized / holding.cost_basis * 100.0
                } else {
                    0.0
                },
            });
        }
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        let total_value = cash + market_value;
        let total_pnl = total_value - self.starting_cash;

        PortfolioContext {
            cash_balance: cash,
            total_value,
            total_pnl,
            total_pnl_percent: if self.starting_cash > 0.0 {
                total_pnl / self.starting_cash * 100.0
            } else {
                0.0
            },
            positions,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SymbolTick;

    fn snapshot(price: f64) -> MarketSnapshot {
        MarketSnapshot {
            captured_at: chrono::Utc::now().to_rfc3339(),
            ticks: vec![SymbolTick {
                symbol: "BTCUSDT".into(),
                price,
                change_24h: 0.0,
                volume_24h: 0.0,
            }],
        }
    }

    fn fill(agent: &str, action: TradeAction, quantity: f64, price: f64) -> Fill {
        Fill {
            agent_id: agent.to_string(),
            symbol: "BTCUSDT".to_string(),
            action,
            quantity,
            notional: quantity * price,
            price,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn empty_history_is_all_cash() {
        let store = FillStore::new(10_000.0);
        let p = store.portfolio_for("atlas", &snapshot(65_000.0));
        assert_eq!(p.cash_balance, 10_000.0);
        assert_eq!(p.total_value, 10_000.0);
        assert!(p.positions.is_empty());
        assert_eq!(p.total_pnl, 0.0);
    }

    #[test]
    fn buy_moves_cash_into_a_position() {
        let store = FillStore::new(10_000.0);
        store.record(fill("atlas", TradeAction::Buy, 0.04, 50_000.0));

        let p = store.portfolio_for("atlas", &snapshot(50_000.0));
        assert!((p.cash_balance - 8_000.0).abs() < 1e-9);
        assert_eq!(p.positions.len(), 1);
        assert!((p.positions[0].quantity - 0.04).abs() < 1e-12);
        assert!((p.positions[0].avg_cost - 50_000.0).abs() < 1e-9);
        assert!((p.total_value - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn price_appreciation_shows_as_unrealized_pnl() {
        let store = FillStore::new(10_000.0);
        store.record(fill("atlas", TradeAction::Buy, 0.04, 50_000.0));

        let p = store.portfolio_for("atlas", &snapshot(55_000.0));
        let pos = &p.positions[0];
        assert!((pos.unrealized_pnl - 200.0).abs() < 1e-9);
        assert!((pos.unrealized_pnl_percent - 10.0).abs() < 1e-9);
        assert!((p.total_pnl - 200.0).abs() < 1e-9);
        assert!((p.total_pnl_percent - 2.0).abs() < 1e-9);
    }

    #[test]
    fn partial_sell_releases_proportional_cost_basis() {
        let store = FillStore::new(10_000.0);
        store.record(fill("atlas", TradeAction::Buy, 0.04, 50_000.0));
        store.record(fill("atlas", TradeAction::Sell, 0.02, 55_000.0));

        let p = store.portfolio_for("atlas", &snapshot(55_000.0));
        // 8_000 cash + 0.02 * 55_000 sold back.
        assert!((p.cash_balance - 9_100.0).abs() < 1e-9);
        let pos = &p.positions[0];
        assert!((pos.quantity - 0.02).abs() < 1e-12);
        assert!((pos.avg_cost - 50_000.0).abs() < 1e-9);
    }

    #[test]
    fn full_exit_removes_the_position() {
        let store = FillStore::new(10_000.0);
        store.record(fill("atlas", TradeAction::Buy, 0.04, 50_000.0));
        store.record(fill("atlas", TradeAction::Sell, 0.04, 60_000.0));

        let p = store.portfolio_for("atlas", &snapshot(60_000.0));
        assert!(p.positions.is_empty());
        assert!((p.total_pnl - 400.0).abs() < 1e-9);
    }

    #[test]
    fn agents_are_isolated() {
        let store = FillStore::new(10_000.0);
        store.record(fill("atlas", TradeAction::Buy, 0.04, 50_000.0));

        let other = store.portfolio_for("borealis", &snapshot(50_000.0));
        assert!(other.positions.is_empty());
        assert_eq!(other.cash_balance, 10_000.0);
    }
}
