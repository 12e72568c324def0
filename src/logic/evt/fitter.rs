//! EVT threshold fitters
//!
//! - `fit_standard`: GEV per class on negated scores, no outlier handling
//! - `fit_robust`: IQR trimming, sanity bounds and percentile fallbacks
//! - `fit_global`: one class-agnostic model over the upper tail of dev scores

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{
    IQR_MULTIPLIER, MAX_ABS_SHAPE, MAX_SCALE, MIN_CLASS_SAMPLES, MIN_TRIMMED_SAMPLES,
    SMALL_CLASS_PERCENTILE,
};
use crate::logic::error::EvtError;
use crate::logic::model::{FallbackReason, FittedModel, ThresholdKey, ThresholdTable};
use super::gev::{self, GevParams};
use super::stats;

/// Tail settings for the class-agnostic fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvtSettings {
    pub fpr: f64,
    pub tail_fraction: f64,
    pub min_tail_size: usize,
}

/// Outcome of fitting one population
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFit {
    pub threshold: f64,
    pub model: FittedModel,
}

impl ClassFit {
    fn gev(threshold: f64, params: GevParams) -> Self {
        Self {
            threshold,
            model: FittedModel::Gev {
                shape: params.shape,
                loc: params.loc,
                scale: params.scale,
            },
        }
    }

    fn percentile(value: f64, percentile: f64, reason: FallbackReason) -> Self {
        Self {
            threshold: value,
            model: FittedModel::Percentile { value, percentile, reason },
        }
    }
}

/// `-ppf(1 - fpr)` of a GEV fitted to negated scores
pub fn negated_threshold(params: &GevParams, fpr: f64) -> f64 {
    -params.ppf(1.0 - fpr)
}

/// Sanity bounds on fitted parameters: |shape| <= 2, 0 < scale <= 10
pub fn check_params(params: &GevParams) -> Result<(), FallbackReason> {
    if params.shape.abs() > MAX_ABS_SHAPE || params.scale <= 0.0 || params.scale > MAX_SCALE {
        return Err(FallbackReason::ParamsOutOfBounds {
            shape: params.shape,
            loc: params.loc,
            scale: params.scale,
        });
    }
    Ok(())
}

/// Upper sanity bound for a threshold: twice the max for positive scores.
/// `max + |max|` keeps the bound at or above `max` when every score is
/// negative (eval-normalized losses below the train minimum).
pub fn upper_bound(max: f64) -> f64 {
    max + max.abs()
}

fn finite(scores: &[f64]) -> Vec<f64> {
    scores.iter().copied().filter(|s| s.is_finite()).collect()
}

// ============================================================================
// STANDARD
// ============================================================================

/// GEV per class on negated scores. Assumes clean inputs: any fit failure
/// is returned to the caller.
pub fn fit_standard(
    class_scores: &BTreeMap<u32, Vec<f64>>,
    fpr: f64,
) -> Result<ThresholdTable, EvtError> {
    if class_scores.is_empty() {
        return Err(EvtError::NoScores);
    }

    let mut table = ThresholdTable::new();
    for (&class, scores) in class_scores {
        let key = ThresholdKey::Class(class);
        let negated: Vec<f64> = scores.iter().map(|s| -s).collect();

        let params = gev::fit(&negated).map_err(|source| EvtError::FitFailure {
            key: key.to_string(),
            source,
        })?;
        let threshold = negated_threshold(&params, fpr);
        if !threshold.is_finite() {
            return Err(EvtError::FitFailure {
                key: key.to_string(),
                source: gev::FitError::NoConvergence,
            });
        }

        log::info!(
            "Class {}: GEV(shape={:.4}, loc={:.4}, scale={:.4}) -> threshold {:.4}",
            class, params.shape, params.loc, params.scale, threshold
        );
        let fit = ClassFit::gev(threshold, params);
        table.insert(key, fit.threshold, fit.model);
    }
    Ok(table)
}

// ============================================================================
// ROBUST
// ============================================================================

/// Robust fit of one class. `None` when the class has no finite score.
pub fn fit_class_robust(scores: &[f64], fpr: f64) -> Option<ClassFit> {
    let raw = finite(scores);
    if raw.is_empty() {
        return None;
    }

    if raw.len() < MIN_CLASS_SAMPLES {
        let value = stats::percentile(&raw, SMALL_CLASS_PERCENTILE)?;
        return Some(ClassFit::percentile(
            value,
            SMALL_CLASS_PERCENTILE,
            FallbackReason::InsufficientSamples { count: raw.len() },
        ));
    }

    let (lower, upper) = stats::iqr_bounds(&raw, IQR_MULTIPLIER)?;
    let clean: Vec<f64> = raw.iter().copied().filter(|s| *s >= lower && *s <= upper).collect();

    if clean.len() < MIN_TRIMMED_SAMPLES {
        let value = stats::percentile(&raw, SMALL_CLASS_PERCENTILE)?;
        return Some(ClassFit::percentile(
            value,
            SMALL_CLASS_PERCENTILE,
            FallbackReason::TooFewAfterTrim { count: clean.len() },
        ));
    }

    let fallback_pct = 100.0 * (1.0 - fpr);
    let fallback_value = stats::percentile(&clean, fallback_pct)?;
    let fallback = |reason: FallbackReason| -> Option<ClassFit> {
        Some(ClassFit::percentile(fallback_value, fallback_pct, reason))
    };

    let negated: Vec<f64> = clean.iter().map(|s| -s).collect();
    let params = match gev::fit(&negated) {
        Ok(p) => p,
        Err(e) => return fallback(FallbackReason::FitFailed { message: e.to_string() }),
    };
    if let Err(reason) = check_params(&params) {
        return fallback(reason);
    }

    let threshold = negated_threshold(&params, fpr);
    if !threshold.is_finite() {
        return fallback(FallbackReason::FitFailed {
            message: "non-finite threshold".to_string(),
        });
    }
    if threshold < stats::min(&clean) || threshold > upper_bound(stats::max(&raw)) {
        return fallback(FallbackReason::ThresholdOutOfRange { rejected: threshold });
    }

    Some(ClassFit::gev(threshold, params))
}

/// Robust fit for every class; never fails
pub fn fit_robust(class_scores: &BTreeMap<u32, Vec<f64>>, fpr: f64) -> ThresholdTable {
    let mut table = ThresholdTable::new();

    for (&class, scores) in class_scores {
        let Some(fit) = fit_class_robust(scores, fpr) else {
            log::warn!("Class {} has no valid scores, no threshold recorded", class);
            continue;
        };

        match &fit.model {
            FittedModel::Percentile { reason, .. } => {
                log::warn!("Class {}: {}, using percentile threshold {:.4}", class, reason, fit.threshold);
            }
            FittedModel::Gev { shape, loc, scale } => {
                log::info!(
                    "Class {}: GEV(shape={:.4}, loc={:.4}, scale={:.4}) -> threshold {:.4}",
                    class, shape, loc, scale, fit.threshold
                );
            }
        }
        table.insert(ThresholdKey::Class(class), fit.threshold, fit.model);
    }

    table
}

// ============================================================================
// GLOBAL (CLASS-AGNOSTIC)
// ============================================================================

/// Fit a GEV to the upper `tail_fraction` of the dev scores and solve
/// `P(score > t) = fpr` through the tail model:
/// `t = ppf(1 - fpr / tail_fraction)`.
pub fn fit_global(dev_scores: &[f64], settings: &EvtSettings) -> Result<ClassFit, EvtError> {
    let mut sorted = finite(dev_scores);
    if sorted.is_empty() {
        return Err(EvtError::NoScores);
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let fallback_pct = 100.0 * (1.0 - settings.fpr);
    let fallback_value = stats::percentile_sorted(&sorted, fallback_pct);
    let fallback = |reason: FallbackReason| -> Result<ClassFit, EvtError> {
        Ok(ClassFit::percentile(fallback_value, fallback_pct, reason))
    };

    let tail_size = ((settings.tail_fraction * sorted.len() as f64).ceil() as usize).min(sorted.len());
    if tail_size < settings.min_tail_size {
        return fallback(FallbackReason::InsufficientSamples { count: tail_size });
    }
    if settings.fpr >= settings.tail_fraction {
        return fallback(FallbackReason::FprOutsideTail {
            fpr: settings.fpr,
            tail_fraction: settings.tail_fraction,
        });
    }

    let tail = &sorted[sorted.len() - tail_size..];
    let params = match gev::fit(tail) {
        Ok(p) => p,
        Err(e) => return fallback(FallbackReason::FitFailed { message: e.to_string() }),
    };
    if let Err(reason) = check_params(&params) {
        return fallback(reason);
    }

    let threshold = params.ppf(1.0 - settings.fpr / settings.tail_fraction);
    if !threshold.is_finite() {
        return fallback(FallbackReason::FitFailed {
            message: "non-finite threshold".to_string(),
        });
    }
    if threshold < sorted[0] || threshold > upper_bound(sorted[sorted.len() - 1]) {
        return fallback(FallbackReason::ThresholdOutOfRange { rejected: threshold });
    }

    Ok(ClassFit::gev(threshold, params))
}

/// Result of the EVT-on-VAE-losses calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalEvtResult {
    pub threshold: f64,
    pub model: FittedModel,
    pub dev_count: usize,
    pub tail_size: usize,
    /// Fraction of in-domain test scores above the threshold
    pub test_exceedance: Option<f64>,
    /// Fraction of OOD scores above the threshold
    pub ood_exceedance: Option<f64>,
}

fn exceedance(scores: &[f64], threshold: f64) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    // Invalid scores count as exceeding
    let above = scores.iter().filter(|s| !(**s <= threshold)).count();
    Some(above as f64 / scores.len() as f64)
}

/// Global EVT fit on dev losses, reported against test and OOD losses
pub fn evt_on_losses(
    dev: &[f64],
    test: &[f64],
    ood: &[f64],
    settings: &EvtSettings,
) -> Result<GlobalEvtResult, EvtError> {
    let fit = fit_global(dev, settings)?;
    let dev_count = dev.iter().filter(|v| v.is_finite()).count();

    match &fit.model {
        FittedModel::Percentile { reason, .. } => {
            log::warn!("Global EVT: {}, using percentile threshold {:.4}", reason, fit.threshold)
        }
        FittedModel::Gev { shape, loc, scale } => log::info!(
            "Global EVT: GEV(shape={:.4}, loc={:.4}, scale={:.4}) -> threshold {:.4}",
            shape, loc, scale, fit.threshold
        ),
    }

    let result = GlobalEvtResult {
        threshold: fit.threshold,
        model: fit.model,
        dev_count,
        tail_size: ((settings.tail_fraction * dev_count as f64).ceil() as usize).min(dev_count),
        test_exceedance: exceedance(test, fit.threshold),
        ood_exceedance: exceedance(ood, fit.threshold),
    };

    if let (Some(fp), Some(tp)) = (result.test_exceedance, result.ood_exceedance) {
        log::info!("Global EVT: test FPR {:.4}, OOD detection rate {:.4}", fp, tp);
    }
    Ok(result)
}
