// =============================================================================
// Calibration Tracker: does stated confidence predict being right?
// =============================================================================
//
// Accumulates (confidence, outcomeCorrect) pairs per agent as ledger outcomes
// resolve. Expected Calibration Error is computed over ten equal-width
// confidence bins; Brier score over the raw pairs.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;

/// Equal-width confidence bins for ECE.
const BINS: usize = 10;

/// Resolved samples retained per agent.
const MAX_SAMPLES_PER_AGENT: usize = 1_000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationReport {
    pub samples: usize,
    /// Expected Calibration Error in [0, 1].
    pub ece: f64,
    /// Brier score in [0, 1].
    pub brier: f64,
    /// Whether high-confidence decisions are at least as accurate as
    /// low-confidence ones.
    pub monotonic: bool,
}

impl CalibrationReport {
    fn empty() -> Self {
        Self {
            samples: 0,
            ece: 0.0,
            brier: 0.0,
            monotonic: true,
        }
    }
}

/// Per-agent calibration history.
pub struct CalibrationTracker {
    inner: RwLock<HashMap<String, VecDeque<(f64, bool)>>>,
}

impl CalibrationTracker {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Record one resolved outcome. Confidence is clamped into [0, 100].
    pub fn record(&self, agent_id: &str, confidence: f64, correct: bool) {
        let mut inner = self.inner.write();
        let samples = inner.entry(agent_id.to_string()).or_default();
        samples.push_back((confidence.clamp(0.0, 100.0), correct));
        while samples.len() > MAX_SAMPLES_PER_AGENT {
            samples.pop_front();
        }
    }

    /// Compute the agent's calibration report over its retained samples.
    pub fn report(&self, agent_id: &str) -> CalibrationReport {
        let inner = self.inner.read();
        let Some(samples) = inner.get(agent_id) else {
            return CalibrationReport::empty();
        };
        if samples.is_empty() {
            return CalibrationReport::empty();
        }

        let n = samples.len() as f64;

        // Brier score over probabilities.
        let brier = samples
            .iter()
            .map(|&(conf, correct)| {
                let p = conf / 100.0;
                let y = if correct { 1.0 } else { 0.0 };
                (p - y).powi(2)
            })
            .sum::<f64>()
            / n;

        // ECE over equal-width bins.
        let mut bin_count = [0usize; BINS];
        let mut bin_conf = [0.0f64; BINS];
        let mut bin_correct = [0usize; BINS];
        for &(conf, correct) in samples {
            let idx = ((conf / 100.0 * BINS as f64) as usize).min(BINS - 1);
            bin_count[idx] += 1;
            bin_conf[idx] += conf / 100.0;
            if correct {
                bin_correct[idx] += 1;
            }
        }

        let mut ece = 0.0;
        for b in 0..BINS {
            if bin_count[b] == 0 {
                continue;
            }
            let count = bin_count[b] as f64;
            let avg_conf = bin_conf[b] / count;
            let accuracy = bin_correct[b] as f64 / count;
            ece += (count / n) * (accuracy - avg_conf).abs();
        }

        // Monotonicity: accuracy above the confidence midpoint must not fall
        // below accuracy beneath it.
        let (mut hi_n, mut hi_c, mut lo_n, mut lo_c) = (0.0, 0.0, 0.0, 0.0);
        for &(conf, correct) in samples {
            if conf >= 50.0 {
                hi_n += 1.0;
                if correct {
                    hi_c += 1.0;
                }
            } else {
                lo_n += 1.0;
                if correct {
                    lo_c += 1.0;
                }
            }
        }
        let monotonic = if hi_n > 0.0 && lo_n > 0.0 {
            hi_c / hi_n >= lo_c / lo_n
        } else {
            true
        };

        CalibrationReport {
            samples: samples.len(),
            ece,
            brier,
            monotonic,
        }
    }
}

impl Default for CalibrationTracker {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
