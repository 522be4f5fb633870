// =============================================================================
// Personality Evolution: six traits tracked over a bounded decision history
// =============================================================================
//
// Every decision an agent makes is recorded with its peer context. Every
// tenth recording triggers a snapshot of six traits, each in [0, 100]:
//
//   aggressiveness   non-hold rate
//   contrarianism    rate of opposing the peer majority
//   conviction       average confidence
//   diversification  normalized Shannon entropy over traded symbols,
//                    scaled by a breadth factor
//   win sensitivity  behavioral shift around winning outcomes
//   loss sensitivity behavioral shift around losing outcomes
//
// Drift is the Euclidean distance between the baseline (first) snapshot and
// the latest one in the 6-D trait space; above 15 it counts as significant.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use crate::types::{TradeAction, TradingDecision};

/// Snapshot cadence in recorded decisions.
const SNAPSHOT_EVERY: usize = 10;

/// Drift above this distance is significant.
const DRIFT_THRESHOLD: f64 = 15.0;

/// Decisions examined on each side of a resolved outcome for sensitivity.
const SENSITIVITY_WINDOW: usize = 3;

/// One recorded decision with its peer context.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedDecision {
    pub agent_id: String,
    pub decision: TradingDecision,
    pub peer_decisions: Vec<TradingDecision>,
    pub pnl_result: Option<f64>,
    /// Globally monotone sequence across all agents.
    pub seq: u64,
}

/// Six traits, each in [0, 100].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraitSnapshot {
    pub aggressiveness: f64,
    pub contrarianism: f64,
    pub conviction: f64,
    pub diversification: f64,
    pub win_sensitivity: f64,
    pub loss_sensitivity: f64,
}

impl TraitSnapshot {
    fn as_vector(&self) -> [f64; 6] {
        [
            self.aggressiveness,
            self.contrarianism,
            self.conviction,
            self.diversification,
            self.win_sensitivity,
            self.loss_sensitivity,
        ]
    }

    /// Euclidean distance in the 6-D trait space.
    pub fn distance(&self, other: &TraitSnapshot) -> f64 {
        self.as_vector()
            .iter()
            .zip(other.as_vector().iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityReport {
    pub decisions_recorded: usize,
    pub baseline: Option<TraitSnapshot>,
    pub current: Option<TraitSnapshot>,
    pub drift: f64,
    pub significant_drift: bool,
}

struct AgentHistory {
    decisions: VecDeque<RecordedDecision>,
    recorded_total: usize,
    baseline: Option<TraitSnapshot>,
    latest: Option<TraitSnapshot>,
}

impl AgentHistory {
    fn new() -> Self {
        Self {
            decisions: VecDeque::new(),
            recorded_total: 0,
            baseline: None,
            latest: None,
        }
    }
}

/// Ring-buffered personality store, writer-per-agent.
pub struct PersonalityTracker {
    capacity: usize,
    global_seq: AtomicU64,
    inner: RwLock<HashMap<String, AgentHistory>>,
}

impl PersonalityTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            global_seq: AtomicU64::new(0),
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Record one decision with peer context; returns its global sequence.
    pub fn record(
        &self,
        agent_id: &str,
        decision: TradingDecision,
        peer_decisions: Vec<TradingDecision>,
    ) -> u64 {
        let seq = self.global_seq.fetch_add(1, Ordering::SeqCst);

        let mut inner = self.inner.write();
        let history = inner
            .entry(agent_id.to_string())
            .or_insert_with(AgentHistory::new);

        history.decisions.push_back(RecordedDecision {
            agent_id: agent_id.to_string(),
            decision,
            peer_decisions,
            pnl_result: None,
            seq,
        });
        while history.decisions.len() > self.capacity {
            history.decisions.pop_front();
        }

        history.recorded_total += 1;
        if history.recorded_total % SNAPSHOT_EVERY == 0 {
            let snapshot = compute_traits(&history.decisions);
            if history.baseline.is_none() {
                history.baseline = Some(snapshot.clone());
            }
            history.latest = Some(snapshot);
        }

        seq
    }

    /// Attach a resolved P&L to the agent's oldest unresolved decision on
    /// `symbol`. Outcomes resolve in ledger order, so FIFO matching keeps
    /// decision and result aligned.
    pub fn resolve_outcome(&self, agent_id: &str, symbol: &str, pnl: f64) {
        let mut inner = self.inner.write();
        if let Some(history) = inner.get_mut(agent_id) {
            if let Some(rec) = history
                .decisions
                .iter_mut()
                .find(|r| r.pnl_result.is_none() && r.decision.symbol == symbol)
            {
                rec.pnl_result = Some(pnl);
            }
        }
    }

    /// Drift report for one agent.
    pub fn report(&self, agent_id: &str) -> PersonalityReport {
        let inner = self.inner.read();
        let Some(history) = inner.get(agent_id) else {
            return PersonalityReport {
                decisions_recorded: 0,
                baseline: None,
                current: None,
                drift: 0.0,
                significant_drift: false,
            };
        };

        let drift = match (&history.baseline, &history.latest) {
            (Some(base), Some(latest)) => base.distance(latest),
            _ => 0.0,
        };

        PersonalityReport {
            decisions_recorded: history.decisions.len(),
            baseline: history.baseline.clone(),
            current: history.latest.clone(),
            drift,
            significant_drift: drift > DRIFT_THRESHOLD,
        }
    }

    /// Recent decisions for an agent, oldest first.
    pub fn recent_decisions(&self, agent_id: &str, limit: usize) -> Vec<RecordedDecision> {
        let inner = self.inner.read();
        inner
            .get(agent_id)
            .map(|h| {
                h.decisions
                    .iter()
                    .rev()
                    .take(limit)
                    .rev()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Trait computation
// ---------------------------------------------------------------------------

fn compute_traits(decisions: &VecDeque<RecordedDecision>) -> TraitSnapshot {
    let n = decisions.len();
    if n == 0 {
        return TraitSnapshot {
            aggressiveness: 0.0,
            contrarianism: 0.0,
            conviction: 0.0,
            diversification: 0.0,
            win_sensitivity: 0.0,
            loss_sensitivity: 0.0,
        };
    }

    let non_hold = decisions
        .iter()
        .filter(|r| !r.decision.action.is_hold())
        .count();
    let aggressiveness = non_hold as f64 / n as f64 * 100.0;

    let conviction = decisions
        .iter()
        .map(|r| r.decision.confidence)
        .sum::<f64>()
        / n as f64;

    // Contrarianism: opposing the non-hold peer majority.
    let mut contested = 0usize;
    let mut opposed = 0usize;
    for rec in decisions {
        let buys = rec
            .peer_decisions
            .iter()
            .filter(|p| p.action == TradeAction::Buy)
            .count();
        let sells = rec
            .peer_decisions
            .iter()
            .filter(|p| p.action == TradeAction::Sell)
            .count();
        let majority = if buys > sells {
            Some(TradeAction::Buy)
        } else if sells > buys {
            Some(TradeAction::Sell)
        } else {
            None
        };
        if let Some(majority) = majority {
            contested += 1;
            let opposite = match majority {
                TradeAction::Buy => TradeAction::Sell,
                TradeAction::Sell => TradeAction::Buy,
                TradeAction::Hold => unreachable!(),
            };
            if rec.decision.action == opposite {
                opposed += 1;
            }
        }
    }
    let contrarianism = if contested > 0 {
        opposed as f64 / contested as f64 * 100.0
    } else {
        0.0
    };

    // Diversification: normalized Shannon entropy over traded symbols with a
    // breadth factor rewarding four or more distinct symbols.
    let mut symbol_counts: HashMap<&str, usize> = HashMap::new();
    for rec in decisions.iter().filter(|r| !r.decision.action.is_hold()) {
        *symbol_counts.entry(rec.decision.symbol.as_str()).or_default() += 1;
    }
    let traded: usize = symbol_counts.values().sum();
    let distinct = symbol_counts.len();
    let diversification = if distinct > 1 && traded > 0 {
        let entropy: f64 = symbol_counts
            .values()
            .map(|&c| {
                let p = c as f64 / traded as f64;
                -p * p.ln()
            })
            .sum();
        let normalized = entropy / (distinct as f64).ln();
        let breadth = (distinct as f64 / 4.0).min(1.0);
        normalized * breadth * 100.0
    } else {
        0.0
    };

    let win_sensitivity = outcome_sensitivity(decisions, true);
    let loss_sensitivity = outcome_sensitivity(decisions, false);

    TraitSnapshot {
        aggressiveness,
        contrarianism,
        conviction,
        diversification,
        win_sensitivity,
        loss_sensitivity,
    }
}

/// Average absolute change in confidence and trade rate across the
/// `SENSITIVITY_WINDOW` decisions on each side of resolved outcomes.
fn outcome_sensitivity(decisions: &VecDeque<RecordedDecision>, wins: bool) -> f64 {
    let items: Vec<&RecordedDecision> = decisions.iter().collect();
    let mut shifts = Vec::new();

    for (i, rec) in items.iter().enumerate() {
        let Some(pnl) = rec.pnl_result else { continue };
        if wins != (pnl >= 0.0) {
            continue;
        }

        let before: Vec<&&RecordedDecision> =
            items[i.saturating_sub(SENSITIVITY_WINDOW)..i].iter().collect();
        let after_end = (i + 1 + SENSITIVITY_WINDOW).min(items.len());
        let after: Vec<&&RecordedDecision> = items[i + 1..after_end].iter().collect();
        if before.is_empty() || after.is_empty() {
            continue;
        }

        let conf = |set: &[&&RecordedDecision]| {
            set.iter().map(|r| r.decision.confidence).sum::<f64>() / set.len() as f64
        };
        let rate = |set: &[&&RecordedDecision]| {
            set.iter()
                .filter(|r| !r.decision.action.is_hold())
                .count() as f64
                / set.len() as f64
        };

        let conf_shift = (conf(&after) - conf(&before)).abs();
        let rate_shift = (rate(&after) - rate(&before)).abs() * 100.0;
        shifts.push((conf_shift + rate_shift) / 2.0);
    }

    if shifts.is_empty() {
        0.0
    } else {
        (shifts.iter().sum::<f64>() / shifts.len() as f64).min(100.0)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(action: TradeAction, symbol: &str, confidence: f64) -> TradingDecision {
        let mut d = TradingDecision::hold(symbol, "test reasoning long enough to pass checks");
        d.action = action;
        d.confidence = confidence;
        if !action.is_hold() {
            d.quantity = 10.0;
        }
        d
    }

    #[test]
    fn sequences_are_globally_monotone() {
        let tracker = PersonalityTracker::new(500);
        let a = tracker.record("atlas", decision(TradeAction::Buy, "BTCUSDT", 60.0), vec![]);
        let b = tracker.record("borealis", decision(TradeAction::Sell, "ETHUSDT", 50.0), vec![]);
        let c = tracker.record("atlas", decision(TradeAction::Hold, "BTCUSDT", 40.0), vec![]);
        assert!(a < b && b < c);
    }

    #[test]
    fn ring_evicts_oldest_beyond_capacity() {
        let tracker = PersonalityTracker::new(5);
        for i in 0..8 {
            tracker.record(
                "atlas",
                decision(TradeAction::Buy, "BTCUSDT", i as f64),
                vec![],
            );
        }
        let recent = tracker.recent_decisions("atlas", 100);
        assert_eq!(recent.len(), 5);
        // Oldest evicted first: confidences 3..=7 remain.
        assert_eq!(recent[0].decision.confidence, 3.0);
        assert_eq!(recent[4].decision.confidence, 7.0);
    }

    #[test]
    fn snapshot_lands_on_every_tenth_decision() {
        let tracker = PersonalityTracker::new(500);
        for _ in 0..9 {
            tracker.record("atlas", decision(TradeAction::Buy, "BTCUSDT", 70.0), vec![]);
        }
        assert!(tracker.report("atlas").current.is_none());

        tracker.record("atlas", decision(TradeAction::Buy, "BTCUSDT", 70.0), vec![]);
        let report = tracker.report("atlas");
        let current = report.current.expect("snapshot after 10 decisions");
        assert!((current.aggressiveness - 100.0).abs() < 1e-9);
        assert!((current.conviction - 70.0).abs() < 1e-9);
        assert!(report.baseline.is_some());
        assert_eq!(report.drift, 0.0);
    }

    #[test]
    fn drift_becomes_significant_when_behavior_flips() {
        let tracker = PersonalityTracker::new(500);
        // Baseline window: all-in aggressive buyer.
        for _ in 0..10 {
            tracker.record("atlas", decision(TradeAction::Buy, "BTCUSDT", 90.0), vec![]);
        }
        // Later windows: passive low-conviction holder.
        for _ in 0..490 {
            tracker.record("atlas", decision(TradeAction::Hold, "BTCUSDT", 10.0), vec![]);
        }

        let report = tracker.report("atlas");
        assert!(report.drift > DRIFT_THRESHOLD, "drift was {}", report.drift);
        assert!(report.significant_drift);
    }

    #[test]
    fn contrarianism_counts_opposition_to_peer_majority() {
        let tracker = PersonalityTracker::new(500);
        let peers = vec![
            decision(TradeAction::Buy, "BTCUSDT", 60.0),
            decision(TradeAction::Buy, "BTCUSDT", 70.0),
            decision(TradeAction::Hold, "BTCUSDT", 10.0),
        ];
        for _ in 0..10 {
            tracker.record(
                "cipher",
                decision(TradeAction::Sell, "BTCUSDT", 55.0),
                peers.clone(),
            );
        }
        let current = tracker.report("cipher").current.unwrap();
        assert!((current.contrarianism - 100.0).abs() < 1e-9);
    }

    #[test]
    fn diversification_rewards_spread_symbols() {
        let tracker = PersonalityTracker::new(500);
        let symbols = ["BTCUSDT", "ETHUSDT", "SOLUSDT", "XRPUSDT"];
        for i in 0..20 {
            tracker.record(
                "atlas",
                decision(TradeAction::Buy, symbols[i % 4], 60.0),
                vec![],
            );
        }
        let spread = tracker.report("atlas").current.unwrap().diversification;

        let tracker2 = PersonalityTracker::new(500);
        for _ in 0..20 {
            tracker2.record("bravo", decision(TradeAction::Buy, "BTCUSDT", 60.0), vec![]);
        }
        let single = tracker2.report("bravo").current.unwrap().diversification;

        assert!(spread > 90.0);
        assert_eq!(single, 0.0);
    }

    #[test]
    fn outcome_resolution_is_fifo_per_symbol() {
        let tracker = PersonalityTracker::new(500);
        tracker.record("atlas", decision(TradeAction::Buy, "BTCUSDT", 60.0), vec![]);
        tracker.record("atlas", decision(TradeAction::Buy, "BTCUSDT", 70.0), vec![]);

        tracker.resolve_outcome("atlas", "BTCUSDT", 2.0);
        let recent = tracker.recent_decisions("atlas", 10);
        assert_eq!(recent[0].pnl_result, Some(2.0));
        assert_eq!(recent[1].pnl_result, None);

        // The next resolution lands on the next unresolved decision.
        tracker.resolve_outcome("atlas", "BTCUSDT", -1.0);
        let recent = tracker.recent_decisions("atlas", 10);
        assert_eq!(recent[0].pnl_result, Some(2.0));
        assert_eq!(recent[1].pnl_result, Some(-1.0));

        // Nothing left to resolve: a further call changes nothing.
        tracker.resolve_outcome("atlas", "BTCUSDT", 99.0);
        let recent = tracker.recent_decisions("atlas", 10);
        assert_eq!(recent[0].pnl_result, Some(2.0));
        assert_eq!(recent[1].pnl_result, Some(-1.0));
    }
}
