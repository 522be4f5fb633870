// =============================================================================
// Consensus statistics: Welch's t-test, Cohen's d, confidence intervals
// =============================================================================
//
// The p-value comes from the Student t CDF expressed through the regularized
// incomplete beta function:
//
//   p_two_sided = I_{df/(df+t^2)}(df/2, 1/2)
//
// The incomplete beta is evaluated with Lentz's continued-fraction method
// (relative tolerance 1e-10, at most 200 iterations) and a Lanczos ln-gamma
// (g = 7, 9 coefficients), so p-values reproduce across reimplementations to
// at least three decimal places.
// =============================================================================

use serde::Serialize;

const MAX_ITER: usize = 200;
const EPS: f64 = 1e-10;
const FPMIN: f64 = 1e-300;

const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFS: [f64; 9] = [
    0.999_999_999_999_809_93,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_13,
    -176.615_029_162_140_59,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_571_6e-6,
    1.505_632_735_149_311_6e-7,
];

// ---------------------------------------------------------------------------
// Special functions
// ---------------------------------------------------------------------------

/// Natural log of the gamma function (Lanczos approximation).
pub fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        // Reflection formula for the left half-plane.
        let pi = std::f64::consts::PI;
        pi.ln() - (pi * x).sin().abs().ln() - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut acc = LANCZOS_COEFFS[0];
        let t = x + LANCZOS_G + 0.5;
        for (i, &c) in LANCZOS_COEFFS.iter().enumerate().skip(1) {
            acc += c / (x + i as f64);
        }
        0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
    }
}

/// Continued fraction for the incomplete beta, evaluated with Lentz's method.
fn betacf(a: f64, b: f64, x: f64) -> f64 {
    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < FPMIN {
        d = FPMIN;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        // Even step.
        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        h *= d * c;

        // Odd step.
        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;

        if (del - 1.0).abs() < EPS {
            break;
        }
    }

    h
}

/// Regularized incomplete beta function I_x(a, b).
pub fn reg_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front =
        ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    // Use the continued fraction directly where it converges fastest.
    if x < (a + 1.0) / (a + b + 2.0) {
        front * betacf(a, b, x) / a
    } else {
        1.0 - front * betacf(b, a, 1.0 - x) / b
    }
}

// ---------------------------------------------------------------------------
// Descriptive helpers
// ---------------------------------------------------------------------------

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Sample variance (n - 1 denominator).
pub fn variance(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64
}

/// 95 % confidence interval for the mean: mean +/- 1.96 * sqrt(var / n).
pub fn confidence_interval_95(xs: &[f64]) -> (f64, f64) {
    let m = mean(xs);
    if xs.is_empty() {
        return (0.0, 0.0);
    }
    let half = 1.96 * (variance(xs) / xs.len() as f64).sqrt();
    (m - half, m + half)
}

// ---------------------------------------------------------------------------
// Welch's t-test
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WelchResult {
    pub t: f64,
    /// Welch-Satterthwaite degrees of freedom.
    pub df: f64,
    /// Two-sided p-value.
    pub p_value: f64,
}

/// Two-sample Welch t-test. Requires at least two samples on each side.
pub fn welch_t(a: &[f64], b: &[f64]) -> Option<WelchResult> {
    if a.len() < 2 || b.len() < 2 {
        return None;
    }

    let (na, nb) = (a.len() as f64, b.len() as f64);
    let (va, vb) = (variance(a), variance(b));
    let se2 = va / na + vb / nb;
    if se2 <= 0.0 {
        return None;
    }

    let t = (mean(a) - mean(b)) / se2.sqrt();
    let df = se2.powi(2) / ((va / na).powi(2) / (na - 1.0) + (vb / nb).powi(2) / (nb - 1.0));
    let x = df / (df + t * t);
    let p_value = reg_incomplete_beta(df / 2.0, 0.5, x);

    Some(WelchResult { t, df, p_value })
}

// ---------------------------------------------------------------------------
// Cohen's d
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohensD {
    pub d: f64,
    pub label: &'static str,
}

/// Effect-size thresholds: negligible < 0.2 <= small < 0.5 <= medium < 0.8.
pub fn effect_label(d: f64) -> &'static str {
    let m = d.abs();
    if m < 0.2 {
        "negligible"
    } else if m < 0.5 {
        "small"
    } else if m < 0.8 {
        "medium"
    } else {
        "large"
    }
}

/// Cohen's d with pooled standard deviation.
pub fn cohens_d(a: &[f64], b: &[f64]) -> Option<CohensD> {
    if a.len() < 2 || b.len() < 2 {
        return None;
    }

    let (na, nb) = (a.len() as f64, b.len() as f64);
    let pooled_var = ((na - 1.0) * variance(a) + (nb - 1.0) * variance(b)) / (na + nb - 2.0);
    if pooled_var <= 0.0 {
        return None;
    }

    let d = (mean(a) - mean(b)) / pooled_var.sqrt();
    Some(CohensD {
        d,
        label: effect_label(d),
    })
}

// ---------------------------------------------------------------------------
// Head-to-head comparison
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadToHead {
    pub rounds: usize,
    pub wins_a: usize,
    pub wins_b: usize,
    pub draws: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub welch: Option<WelchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cohens_d: Option<CohensD>,
    pub ci_a: (f64, f64),
    pub ci_b: (f64, f64),
}

/// Compare two agents over paired-round P&L series.
///
/// Series are paired by index; a pair closer than 1e-9 counts as a draw.
pub fn head_to_head(pnl_a: &[f64], pnl_b: &[f64]) -> HeadToHead {
    let rounds = pnl_a.len().min(pnl_b.len());
    let a = &pnl_a[..rounds];
    let b = &pnl_b[..rounds];

    let mut wins_a = 0;
    let mut wins_b = 0;
    let mut draws = 0;
    for i in 0..rounds {
        let delta = a[i] - b[i];
        if delta.abs() < 1e-9 {
            draws += 1;
        } else if delta > 0.0 {
            wins_a += 1;
        } else {
            wins_b += 1;
        }
    }

    HeadToHead {
        rounds,
        wins_a,
        wins_b,
        draws,
        welch: welch_t(a, b),
        cohens_d: cohens_d(a, b),
        ci_a: confidence_interval_95(a),
        ci_b: confidence_interval_95(b),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const A: [f64; 5] = [1.0, 2.0, 3.0, 4.0, 5.0];
    const B: [f64; 5] = [3.0, 4.0, 5.0, 6.0, 7.0];

    #[test]
    fn ln_gamma_matches_known_values() {
        // Gamma(1) = Gamma(2) = 1, Gamma(5) = 24, Gamma(0.5) = sqrt(pi).
        assert!(ln_gamma(1.0).abs() < 1e-10);
        assert!(ln_gamma(2.0).abs() < 1e-10);
        assert!((ln_gamma(5.0) - 24.0f64.ln()).abs() < 1e-10);
        assert!((ln_gamma(0.5) - std::f64::consts::PI.sqrt().ln()).abs() < 1e-10);
    }

    #[test]
    fn incomplete_beta_identities() {
        // Symmetry: I_x(a,b) + I_{1-x}(b,a) = 1.
        let lhs = reg_incomplete_beta(2.0, 3.0, 0.3) + reg_incomplete_beta(3.0, 2.0, 0.7);
        assert!((lhs - 1.0).abs() < 1e-9);

        // I_0.5(a,a) = 0.5 by symmetry.
        assert!((reg_incomplete_beta(4.0, 4.0, 0.5) - 0.5).abs() < 1e-9);

        // Edges.
        assert_eq!(reg_incomplete_beta(2.0, 3.0, 0.0), 0.0);
        assert_eq!(reg_incomplete_beta(2.0, 3.0, 1.0), 1.0);
    }

    #[test]
    fn welch_reference_values() {
        let r = welch_t(&A, &B).unwrap();
        // mean diff -2, se 1, so t = -2 with df = 8.
        assert!((r.t + 2.0).abs() < 1e-10);
        assert!((r.df - 8.0).abs() < 1e-10);
        assert!((r.p_value - 0.072).abs() < 0.01);
    }

    #[test]
    fn welch_is_symmetric_in_p_and_antisymmetric_in_t() {
        let ab = welch_t(&A, &B).unwrap();
        let ba = welch_t(&B, &A).unwrap();
        assert!((ab.p_value - ba.p_value).abs() < 1e-12);
        assert!((ab.t + ba.t).abs() < 1e-12);
    }

    #[test]
    fn cohens_d_reference_values() {
        let d = cohens_d(&A, &B).unwrap();
        assert!((d.d + 1.264_911).abs() < 1e-3);
        assert_eq!(d.label, "large");

        let rev = cohens_d(&B, &A).unwrap();
        assert!((rev.d - 1.264_911).abs() < 1e-3);
    }

    #[test]
    fn effect_labels_cover_thresholds() {
        assert_eq!(effect_label(0.1), "negligible");
        assert_eq!(effect_label(-0.3), "small");
        assert_eq!(effect_label(0.6), "medium");
        assert_eq!(effect_label(-2.0), "large");
    }

    #[test]
    fn confidence_interval_brackets_the_mean() {
        let (lo, hi) = confidence_interval_95(&A);
        assert!(lo < 3.0 && 3.0 < hi);
        let half = 1.96 * (variance(&A) / 5.0).sqrt();
        assert!((hi - 3.0 - half).abs() < 1e-12);
    }

    #[test]
    fn head_to_head_counts_pairs() {
        let h = head_to_head(&[1.0, -1.0, 2.0, 0.5], &[1.0, 0.0, 1.0, 0.7]);
        assert_eq!(h.rounds, 4);
        assert_eq!(h.draws, 1);
        assert_eq!(h.wins_a, 1);
        assert_eq!(h.wins_b, 2);
    }

    #[test]
    fn degenerate_samples_are_rejected() {
        assert!(welch_t(&[1.0], &B).is_none());
        assert!(welch_t(&[2.0, 2.0], &[2.0, 2.0]).is_none());
        assert!(cohens_d(&[1.0, 1.0], &[1.0, 1.0]).is_none());
    }
}
