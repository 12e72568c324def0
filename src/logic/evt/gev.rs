//! Generalized Extreme Value distribution
//!
//! Shape convention: `c` with CDF `exp(-(1 - c*y)^(1/c))`, `y = (x - loc) / scale`
//! (`c = 0` is Gumbel). Positive `c` bounds the upper tail, negative `c`
//! bounds the lower one. Parameters are fitted by maximum likelihood with a
//! Nelder-Mead simplex over `(c, loc, ln scale)`.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::stats;

/// |c| below this is treated as the Gumbel limit
const SHAPE_EPS: f64 = 1e-9;
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

const MAX_ITER: usize = 2000;
const XTOL: f64 = 1e-8;
const FTOL: f64 = 1e-10;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FitError {
    #[error("need at least 2 samples, got {0}")]
    TooFewSamples(usize),

    #[error("non-finite sample")]
    NonFinite,

    #[error("degenerate sample (zero spread)")]
    Degenerate,

    #[error("likelihood optimisation did not reach a finite optimum")]
    NoConvergence,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GevParams {
    pub shape: f64,
    pub loc: f64,
    pub scale: f64,
}

impl GevParams {
    pub fn new(shape: f64, loc: f64, scale: f64) -> Self {
        Self { shape, loc, scale }
    }

    pub fn cdf(&self, x: f64) -> f64 {
        let y = (x - self.loc) / self.scale;
        if self.shape.abs() < SHAPE_EPS {
            return (-(-y).exp()).exp();
        }
        let t = 1.0 - self.shape * y;
        if t <= 0.0 {
            // Outside support: above the upper bound (c > 0) or below the lower one
            return if self.shape > 0.0 { 1.0 } else { 0.0 };
        }
        (-t.powf(1.0 / self.shape)).exp()
    }

    /// Inverse CDF, `q` in (0, 1)
    pub fn ppf(&self, q: f64) -> f64 {
        let w = -q.ln();
        if self.shape.abs() < SHAPE_EPS {
            self.loc - self.scale * w.ln()
        } else {
            self.loc + self.scale * (1.0 - w.powf(self.shape)) / self.shape
        }
    }

    /// Negative log-likelihood; `+inf` outside the support
    pub fn neg_log_likelihood(&self, data: &[f64]) -> f64 {
        if !self.scale.is_finite() || self.scale <= 0.0 || !self.shape.is_finite() || !self.loc.is_finite() {
            return f64::INFINITY;
        }

        let mut nll = data.len() as f64 * self.scale.ln();
        for &x in data {
            let y = (x - self.loc) / self.scale;
            if self.shape.abs() < SHAPE_EPS {
                nll += y + (-y).exp();
            } else {
                let t = 1.0 - self.shape * y;
                if t <= 0.0 {
                    return f64::INFINITY;
                }
                let lt = t.ln();
                nll += (lt / self.shape).exp() - (1.0 / self.shape - 1.0) * lt;
            }
        }

        if nll.is_nan() { f64::INFINITY } else { nll }
    }

    fn from_theta(theta: &Point) -> Self {
        Self::new(theta[0], theta[1], theta[2].exp())
    }
}

/// Maximum-likelihood GEV fit
pub fn fit(data: &[f64]) -> Result<GevParams, FitError> {
    if data.len() < 2 {
        return Err(FitError::TooFewSamples(data.len()));
    }
    if data.iter().any(|v| !v.is_finite()) {
        return Err(FitError::NonFinite);
    }

    let mean = stats::mean(data);
    let sd = stats::std_dev(data);
    if sd <= 1e-12 * mean.abs().max(1.0) {
        return Err(FitError::Degenerate);
    }

    // Gumbel moment estimates as the starting scale/location
    let scale0 = sd * 6f64.sqrt() / PI;
    let loc0 = mean - EULER_GAMMA * scale0;

    let (lo, hi) = (stats::min(data), stats::max(data));
    let skew_shape = if stats::skewness(data) < 0.0 { 0.5 } else { -0.5 };
    // Shift the location so every sample is inside the starting support
    let skew_loc = if skew_shape > 0.0 {
        loc0.max(hi - scale0 / skew_shape + 0.05 * scale0)
    } else {
        loc0.min(lo + scale0 / skew_shape.abs() - 0.05 * scale0)
    };

    let starts = [
        [0.0, loc0, scale0.ln()],
        [skew_shape, skew_loc, scale0.ln()],
    ];
    let steps = [0.1, 0.1 * scale0, 0.1];
    let objective = |theta: &Point| GevParams::from_theta(theta).neg_log_likelihood(data);

    let best = starts
        .iter()
        .filter(|start| objective(*start).is_finite())
        .map(|start| nelder_mead(&objective, *start, steps))
        .filter(|(_, value)| value.is_finite())
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .ok_or(FitError::NoConvergence)?;

    let params = GevParams::from_theta(&best.0);
    if !(params.shape.is_finite() && params.loc.is_finite() && params.scale.is_finite()) {
        return Err(FitError::NoConvergence);
    }
    Ok(params)
}

// ============================================================================
// NELDER-MEAD
// ============================================================================

const DIM: usize = 3;
type Point = [f64; DIM];

fn nelder_mead<F: Fn(&Point) -> f64>(f: &F, start: Point, steps: Point) -> (Point, f64) {
    let eval = |p: &Point| {
        let v = f(p);
        if v.is_nan() { f64::INFINITY } else { v }
    };

    let mut simplex: Vec<(Point, f64)> = Vec::with_capacity(DIM + 1);
    simplex.push((start, eval(&start)));
    for i in 0..DIM {
        let mut p = start;
        p[i] += steps[i];
        simplex.push((p, eval(&p)));
    }

    for _ in 0..MAX_ITER {
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));

        let best = simplex[0];
        let worst = simplex[DIM];
        let spread = simplex[1..]
            .iter()
            .flat_map(|(p, _)| p.iter().zip(best.0.iter()).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        if (worst.1 - best.1).abs() <= FTOL && spread <= XTOL {
            break;
        }

        let mut centroid = [0.0; DIM];
        for (p, _) in &simplex[..DIM] {
            for i in 0..DIM {
                centroid[i] += p[i] / DIM as f64;
            }
        }
        let along = |t: f64| -> Point {
            let mut q = [0.0; DIM];
            for i in 0..DIM {
                q[i] = centroid[i] + t * (worst.0[i] - centroid[i]);
            }
            q
        };

        let xr = along(-1.0);
        let fr = eval(&xr);

        if fr < best.1 {
            let xe = along(-2.0);
            let fe = eval(&xe);
            simplex[DIM] = if fe < fr { (xe, fe) } else { (xr, fr) };
        } else if fr < simplex[DIM - 1].1 {
            simplex[DIM] = (xr, fr);
        } else {
            // Outside contraction when the reflection improved on the worst
            let xc = if fr < worst.1 { along(-0.5) } else { along(0.5) };
            let fc = eval(&xc);
            if fc < worst.1.min(fr) {
                simplex[DIM] = (xc, fc);
            } else {
                for entry in simplex.iter_mut().skip(1) {
                    let mut q = entry.0;
                    for i in 0..DIM {
                        q[i] = best.0[i] + 0.5 * (q[i] - best.0[i]);
                    }
                    *entry = (q, eval(&q));
                }
            }
        }
    }

    simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
    simplex[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ppf_inverts_cdf() {
        for shape in [-0.3, 0.0, 0.2] {
            let g = GevParams::new(shape, 1.0, 2.0);
            for q in [0.05, 0.5, 0.95] {
                assert!((g.cdf(g.ppf(q)) - q).abs() < 1e-9, "shape={} q={}", shape, q);
            }
        }
    }

    #[test]
    fn test_gumbel_median() {
        let g = GevParams::new(0.0, 0.0, 1.0);
        // Gumbel median = -ln(ln 2)
        assert!((g.ppf(0.5) + 2f64.ln().ln()).abs() < 1e-12);
    }

    #[test]
    fn test_nll_outside_support_is_infinite() {
        // c > 0 bounds the upper tail at loc + scale / c = 2
        let g = GevParams::new(0.5, 0.0, 1.0);
        assert!(g.neg_log_likelihood(&[0.0, 3.0]).is_infinite());
        assert!(g.neg_log_likelihood(&[0.0, 1.0]).is_finite());
    }

    #[test]
    fn test_fit_recovers_parameters() {
        let truth = GevParams::new(0.1, 2.0, 0.5);
        let n = 400;
        let data: Vec<f64> = (0..n).map(|i| truth.ppf((i as f64 + 0.5) / n as f64)).collect();

        let fitted = fit(&data).unwrap();
        assert!((fitted.shape - truth.shape).abs() < 0.15, "shape {}", fitted.shape);
        assert!((fitted.loc - truth.loc).abs() < 0.1, "loc {}", fitted.loc);
        assert!((fitted.scale - truth.scale).abs() < 0.1, "scale {}", fitted.scale);
    }

    #[test]
    fn test_fit_rejects_bad_input() {
        assert_eq!(fit(&[1.0]), Err(FitError::TooFewSamples(1)));
        assert_eq!(fit(&[0.3; 20]), Err(FitError::Degenerate));
        assert_eq!(fit(&[0.1, f64::NAN, 0.2]), Err(FitError::NonFinite));
    }
}
