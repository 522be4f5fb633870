// =============================================================================
// Scoring Engine: the analyzer pool behind the benchmark score
// =============================================================================
//
// Stateless analyzers (coherence, hallucination, discipline, depth, source
// quality) run on every decision after ledger append. Stateful trackers
// (calibration, personality, P&L) evolve as outcomes resolve. The composite
// benchmark score is a fixed weighted sum; the weight vector is a build-time
// constant tagged `v24` and the tag is stamped on every ledger entry.
// =============================================================================

pub mod calibration;
pub mod coherence;
pub mod consistency;
pub mod depth;
pub mod discipline;
pub mod hallucination;
pub mod personality;
pub mod sources;
pub mod stats;
pub mod taxonomy;

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;

use crate::ledger::{ForensicLedger, LedgerQuery};
use crate::types::{MarketSnapshot, TradingDecision};

use calibration::{CalibrationReport, CalibrationTracker};
use coherence::CoherenceReport;
use consistency::{ConsistencyReport, ConsistencyTracker};
use depth::DepthReport;
use discipline::DisciplineReport;
use hallucination::HallucinationReport;
use personality::{PersonalityReport, PersonalityTracker};
use sources::SourceQualityReport;
use stats::HeadToHead;
use taxonomy::TaxonomyReport;

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

/// Composite weight vector. Weights sum to 1.0.
#[derive(Debug, Clone, Copy)]
pub struct BenchmarkWeights {
    pub coherence: f64,
    pub hallucination_free: f64,
    pub discipline: f64,
    pub calibration: f64,
    pub depth: f64,
    pub source_quality: f64,
    pub pnl: f64,
    pub personality_stability: f64,
}

/// The v24 weight vector.
pub const BENCHMARK_WEIGHTS_V24: BenchmarkWeights = BenchmarkWeights {
    coherence: 0.20,
    hallucination_free: 0.15,
    discipline: 0.10,
    calibration: 0.15,
    depth: 0.15,
    source_quality: 0.10,
    pnl: 0.10,
    personality_stability: 0.05,
};

/// Drift at or above this maps to zero stability.
const DRIFT_SCALE: f64 = 30.0;

// ---------------------------------------------------------------------------
// Per-decision scores
// ---------------------------------------------------------------------------

/// Every analyzer's verdict on a single decision, plus the composite.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionScores {
    pub coherence: CoherenceReport,
    pub hallucination: HallucinationReport,
    pub discipline: DisciplineReport,
    pub depth: DepthReport,
    pub source_quality: SourceQualityReport,
    pub taxonomy: TaxonomyReport,
    pub consistency: ConsistencyReport,
    /// Composite benchmark score in [0, 1].
    pub composite: f64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ScoringEngine {
    weights: BenchmarkWeights,
    pub calibration: CalibrationTracker,
    pub personality: PersonalityTracker,
    pub consistency: ConsistencyTracker,
    /// Resolved P&L percent (sum, count) per agent.
    pnl_stats: RwLock<HashMap<String, (f64, u64)>>,
}

impl ScoringEngine {
    pub fn new(max_decisions_per_agent: usize) -> Self {
        Self {
            weights: BENCHMARK_WEIGHTS_V24,
            calibration: CalibrationTracker::new(),
            personality: PersonalityTracker::new(max_decisions_per_agent),
            consistency: ConsistencyTracker::new(),
            pnl_stats: RwLock::new(HashMap::new()),
        }
    }

    /// Score one decision against the round snapshot and the agent's
    /// accumulated state.
    pub fn evaluate(
        &self,
        agent_id: &str,
        decision: &TradingDecision,
        snapshot: &MarketSnapshot,
    ) -> DecisionScores {
        let coherence = coherence::evaluate(decision);
        let hallucination = hallucination::evaluate(decision, snapshot);
        let discipline = discipline::evaluate(decision);
        let depth = depth::evaluate(decision);
        let source_quality = sources::evaluate(decision);
        let taxonomy = taxonomy::classify(decision);
        let consistency = self.consistency.report(agent_id);

        let calibration = self.calibration.report(agent_id);
        let calibration_score = if calibration.samples > 0 {
            (1.0 - calibration.ece).clamp(0.0, 1.0)
        } else {
            // No resolved history yet: neutral credit.
            0.5
        };

        let pnl_score = {
            let stats = self.pnl_stats.read();
            match stats.get(agent_id) {
                Some((sum, count)) if *count > 0 => {
                    let avg = sum / *count as f64;
                    (0.5 + avg / 10.0).clamp(0.0, 1.0)
                }
                _ => 0.5,
            }
        };

        let personality = self.personality.report(agent_id);
        let stability = (1.0 - personality.drift / DRIFT_SCALE).clamp(0.0, 1.0);

        let w = &self.weights;
        let composite = w.coherence * coherence.score
            + w.hallucination_free * (1.0 - hallucination.severity)
            + w.discipline * if discipline.passed { 1.0 } else { 0.0 }
            + w.calibration * calibration_score
            + w.depth * depth.score
            + w.source_quality * source_quality.score
            + w.pnl * pnl_score
            + w.personality_stability * stability;

        DecisionScores {
            coherence,
            hallucination,
            discipline,
            depth,
            source_quality,
            taxonomy,
            consistency,
            composite,
        }
    }

    /// Feed the stateful per-decision trackers after a round records one.
    pub fn record_decision(
        &self,
        agent_id: &str,
        decision: TradingDecision,
        peer_decisions: Vec<TradingDecision>,
    ) -> u64 {
        self.consistency
            .observe(agent_id, &decision.symbol, decision.action);
        self.personality.record(agent_id, decision, peer_decisions)
    }

    pub fn consistency_report(&self, agent_id: &str) -> ConsistencyReport {
        self.consistency.report(agent_id)
    }

    /// Feed the stateful trackers when a ledger outcome resolves.
    pub fn record_outcome(
        &self,
        agent_id: &str,
        symbol: &str,
        confidence: f64,
        correct: bool,
        pnl_percent: f64,
    ) {
        self.calibration.record(agent_id, confidence, correct);
        self.personality
            .resolve_outcome(agent_id, symbol, pnl_percent);
        let mut stats = self.pnl_stats.write();
        let entry = stats.entry(agent_id.to_string()).or_insert((0.0, 0));
        entry.0 += pnl_percent;
        entry.1 += 1;
    }

    pub fn calibration_report(&self, agent_id: &str) -> CalibrationReport {
        self.calibration.report(agent_id)
    }

    pub fn personality_report(&self, agent_id: &str) -> PersonalityReport {
        self.personality.report(agent_id)
    }

    /// Pairwise consensus statistics over rounds both agents resolved.
    pub fn consensus(&self, ledger: &ForensicLedger, agent_a: &str, agent_b: &str) -> HeadToHead {
        let (a, b) = paired_round_pnls(ledger, agent_a, agent_b);
        stats::head_to_head(&a, &b)
    }
}

/// Collect resolved P&L per round for both agents and pair them by round id,
/// in chronological order.
fn paired_round_pnls(
    ledger: &ForensicLedger,
    agent_a: &str,
    agent_b: &str,
) -> (Vec<f64>, Vec<f64>) {
    let resolved_for = |agent: &str| {
        let result = ledger.query(&LedgerQuery {
            agent_id: Some(agent.to_string()),
            outcome_resolved: Some(true),
            limit: Some(usize::MAX),
            ..LedgerQuery::default()
        });
        // Newest first from the query; flip to chronological.
        let mut by_round: Vec<(String, u64, f64)> = result
            .entries
            .into_iter()
            .filter_map(|e| e.pnl_percent.map(|p| (e.round_id, e.sequence_number, p)))
            .collect();
        by_round.sort_by_key(|(_, seq, _)| *seq);
        by_round
    };

    let rounds_a = resolved_for(agent_a);
    let rounds_b = resolved_for(agent_b);
    let index_b: HashMap<&str, f64> = rounds_b
        .iter()
        .map(|(round, _, pnl)| (round.as_str(), *pnl))
        .collect();

    let mut a = Vec::new();
    let mut b = Vec::new();
    for (round, _, pnl) in &rounds_a {
        if let Some(peer_pnl) = index_b.get(round.as_str()) {
            a.push(*pnl);
            b.push(*peer_pnl);
        }
    }
    (a, b)
}

// =============================================================================
// Tests
// =============================================================================
