use std::collections::BTreeMap;

use super::*;
use super::fitter::{check_params, upper_bound};
use crate::constants::{IQR_MULTIPLIER, MAX_ABS_SHAPE, MAX_SCALE};
use crate::logic::model::{FallbackReason, FittedModel, ThresholdKey};

/// Deterministic pseudo-random scores in [lo, hi)
fn lcg_scores(seed: u64, n: usize, lo: f64, hi: f64) -> Vec<f64> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let u = (state >> 11) as f64 / (1u64 << 53) as f64;
            lo + u * (hi - lo)
        })
        .collect()
}

fn settings() -> EvtSettings {
    EvtSettings { fpr: 0.05, tail_fraction: 0.2, min_tail_size: 30 }
}

#[test]
fn test_small_class_uses_p95_of_raw_scores() {
    let scores = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9];
    let fit = fit_class_robust(&scores, 0.05).unwrap();

    assert!(!fit.model.is_gev());
    let expected = stats::percentile(&scores, 95.0).unwrap();
    assert!((fit.threshold - expected).abs() < 1e-12);
    assert!(matches!(
        fit.model,
        FittedModel::Percentile { reason: FallbackReason::InsufficientSamples { count: 9 }, .. }
    ));
}

#[test]
fn test_outlier_does_not_skew_threshold() {
    // Twelve scores clustered near 0.1 plus one injected outlier
    let mut scores = vec![
        0.08, 0.09, 0.095, 0.1, 0.1, 0.105, 0.11, 0.1, 0.092, 0.098, 0.104, 0.12,
    ];
    scores.push(5.0);

    let fit = fit_class_robust(&scores, 0.05).unwrap();
    assert!(fit.threshold >= 0.08, "threshold {}", fit.threshold);
    assert!(fit.threshold <= 0.3, "threshold {}", fit.threshold);
}

#[test]
fn test_check_params_bounds() {
    assert!(check_params(&GevParams::new(0.5, 0.0, 1.0)).is_ok());
    assert!(check_params(&GevParams::new(2.5, 0.0, 1.0)).is_err());
    assert!(check_params(&GevParams::new(-2.5, 0.0, 1.0)).is_err());
    assert!(check_params(&GevParams::new(0.1, 0.0, 0.0)).is_err());
    assert!(check_params(&GevParams::new(0.1, 0.0, 11.0)).is_err());
}

#[test]
fn test_accepted_models_respect_bounds_and_range() {
    for seed in 1..40u64 {
        let n = 5 + (seed as usize * 7) % 60;
        let mut scores = lcg_scores(seed, n, 0.05, 0.6);
        if seed % 3 == 0 {
            scores.push(4.0);
        }

        let Some(fit) = fit_class_robust(&scores, 0.05) else { continue };
        let raw_max = stats::max(&scores);

        if let FittedModel::Gev { shape, scale, .. } = fit.model {
            assert!(shape.abs() <= MAX_ABS_SHAPE);
            assert!(scale > 0.0 && scale <= MAX_SCALE);
        }

        assert!(fit.threshold <= upper_bound(raw_max), "seed {}", seed);
        if scores.len() >= 10 {
            let (lo, hi) = stats::iqr_bounds(&scores, IQR_MULTIPLIER).unwrap();
            let clean: Vec<f64> = scores.iter().copied().filter(|s| *s >= lo && *s <= hi).collect();
            if clean.len() >= 5 {
                assert!(fit.threshold >= stats::min(&clean), "seed {}", seed);
            }
        }
    }
}

#[test]
fn test_robust_table_has_entry_per_class() {
    let mut groups = BTreeMap::new();
    groups.insert(0, lcg_scores(7, 40, 0.05, 0.3));
    groups.insert(1, vec![0.2, 0.3, 0.25]);
    groups.insert(2, vec![f64::NAN]);

    let table = fit_robust(&groups, 0.05);

    assert!(table.get(ThresholdKey::Class(0)).is_some());
    assert!(table.get(ThresholdKey::Class(1)).is_some());
    assert!(!table.models[&ThresholdKey::Class(1)].is_gev());
    // No valid score: no threshold at all
    assert!(table.get(ThresholdKey::Class(2)).is_none());
}

#[test]
fn test_standard_fit_records_gev_per_class() {
    let mut groups = BTreeMap::new();
    // Negated scores drawn from a known GEV
    let truth = GevParams::new(0.1, -0.3, 0.05);
    let sample = |seed| -> Vec<f64> {
        lcg_scores(seed, 80, 0.01, 0.99).into_iter().map(|u| -truth.ppf(u)).collect()
    };
    groups.insert(0, sample(3));
    groups.insert(4, sample(9));

    let table = fit_standard(&groups, 0.05).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.gev_models().count(), 2);
    assert!(table.thresholds.values().all(|t| t.is_finite()));
}

#[test]
fn test_standard_fit_surfaces_degenerate_class() {
    let mut groups = BTreeMap::new();
    groups.insert(5, vec![0.2; 12]);

    let err = fit_standard(&groups, 0.05).unwrap_err();
    assert!(err.to_string().contains('5'));
}

#[test]
fn test_global_small_dev_falls_back_to_percentile() {
    let dev = lcg_scores(11, 50, 0.1, 0.2);
    let fit = fit_global(&dev, &settings()).unwrap();

    // ceil(0.2 * 50) = 10 < 30
    assert!(matches!(
        fit.model,
        FittedModel::Percentile { reason: FallbackReason::InsufficientSamples { count: 10 }, .. }
    ));
    let expected = stats::percentile(&dev, 95.0).unwrap();
    assert!((fit.threshold - expected).abs() < 1e-12);
}

#[test]
fn test_global_threshold_within_observed_range() {
    let dev = lcg_scores(5, 400, 0.1, 0.2);
    let fit = fit_global(&dev, &settings()).unwrap();

    assert!(fit.threshold >= stats::min(&dev));
    assert!(fit.threshold <= 2.0 * stats::max(&dev));
}

#[test]
fn test_global_fpr_outside_tail() {
    let dev = lcg_scores(5, 400, 0.1, 0.2);
    let s = EvtSettings { fpr: 0.3, ..settings() };
    let fit = fit_global(&dev, &s).unwrap();
    assert!(matches!(
        fit.model,
        FittedModel::Percentile { reason: FallbackReason::FprOutsideTail { .. }, .. }
    ));
}

#[test]
fn test_global_rejects_empty_dev() {
    assert!(fit_global(&[f64::NAN], &settings()).is_err());
}

#[test]
fn test_evt_on_losses_reports_exceedance() {
    let dev = lcg_scores(21, 300, 0.1, 0.2);
    let test = vec![0.05; 50];
    let ood = vec![0.9; 50];

    let result = evt_on_losses(&dev, &test, &ood, &settings()).unwrap();
    assert_eq!(result.test_exceedance, Some(0.0));
    assert_eq!(result.ood_exceedance, Some(1.0));
    assert_eq!(result.dev_count, 300);
    assert_eq!(result.tail_size, 60);
}

#[test]
fn test_upper_bound_covers_negative_scores() {
    assert_eq!(upper_bound(0.3), 0.6);
    assert_eq!(upper_bound(-0.22), 0.0);
    assert!(upper_bound(-0.22) >= -0.22);
}

#[test]
fn test_negative_scores_respect_range() {
    for seed in 1..20u64 {
        let n = 9 + (seed as usize * 5) % 40;
        let scores = lcg_scores(seed, n, -0.6, -0.05);

        let fit = fit_class_robust(&scores, 0.05).unwrap();
        let raw_max = stats::max(&scores);
        assert!(fit.threshold <= upper_bound(raw_max), "seed {}", seed);
        assert!(fit.threshold >= stats::min(&scores), "seed {}", seed);
    }
}
