//! End-to-end run
//!
//! 1. Score every split (aligned per example)
//! 2. Normalize: train mode on train, eval mode on dev/test/ood
//! 3. Calibrate: fixed threshold, global EVT on losses, or per-class EVT
//!    on ensemble scores
//! 4. Decide on test + ood and evaluate

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::SENTINEL_HIGH_LOSS;

use super::collector::{score_examples, LossPopulation, RawLoss, ScoringModel};
use super::config::{DetectorConfig, EvtVariant};
use super::dataset::{self, DatasetSplits, Split};
use super::decision::{binary_view, predict, predict_class_conditional, Decision};
use super::ensemble::class_scores;
use super::error::EngineResult;
use super::evt::{evt_on_losses, fit_global, fit_robust, fit_standard, GlobalEvtResult};
use super::metrics::{evaluate, EvaluationReport};
use super::model::{save_table_at, Classifier, Preprocessor, ThresholdKey, ThresholdTable};
use super::normalize::{fit_and_persist, normalize, NormalizeMode};

// ============================================================================
// SCORING
// ============================================================================

/// Per-example raw losses of every split
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitLosses {
    pub train: Vec<RawLoss>,
    pub dev: Vec<RawLoss>,
    pub test: Vec<RawLoss>,
    pub ood: Vec<RawLoss>,
}

fn score_split<M: ScoringModel + ?Sized>(
    model: &mut M,
    split: &Split,
    max_length: usize,
) -> EngineResult<Vec<RawLoss>> {
    let batches = split.batches(max_length)?;
    log::info!("Scoring {} split ({} examples)", split.name, batches.len());
    Ok(score_examples(model, &batches))
}

/// Score all splits with one live model
pub fn score_splits<M: ScoringModel + ?Sized>(
    model: &mut M,
    splits: &DatasetSplits,
    max_length: usize,
) -> EngineResult<SplitLosses> {
    Ok(SplitLosses {
        train: score_split(model, &splits.train, max_length)?,
        dev: score_split(model, &splits.dev, max_length)?,
        test: score_split(model, &splits.test, max_length)?,
        ood: score_split(model, &splits.ood, max_length)?,
    })
}

/// Score all splits from the losses recorded in the records
pub fn replay_split_losses(splits: &DatasetSplits, max_length: usize) -> EngineResult<SplitLosses> {
    let replay = |split: &Split| score_split(&mut dataset::replay_scorer(split), split, max_length);
    Ok(SplitLosses {
        train: replay(&splits.train)?,
        dev: replay(&splits.dev)?,
        test: replay(&splits.test)?,
        ood: replay(&splits.ood)?,
    })
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMode {
    FixedThreshold,
    GlobalEvt,
    ClassConditional,
}

/// Valid/skipped counts of one split
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitSummary {
    pub total: usize,
    pub valid: usize,
    pub skipped: usize,
    pub all_invalid: bool,
}

impl From<&LossPopulation> for SplitSummary {
    fn from(p: &LossPopulation) -> Self {
        Self {
            total: p.total_seen(),
            valid: p.valid_count(),
            skipped: p.skipped_count(),
            all_invalid: p.is_sentinel(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub finished_at: String,
    pub mode: DecisionMode,
    pub ood_label: u32,
    /// Loss threshold of the global paths
    pub threshold: Option<f64>,
    pub global_evt: Option<GlobalEvtResult>,
    pub table: Option<ThresholdTable>,
    pub artifact_path: Option<PathBuf>,
    pub train: SplitSummary,
    pub dev: SplitSummary,
    pub test: SplitSummary,
    pub ood: SplitSummary,
    pub decisions: Vec<Decision>,
    pub evaluation: EvaluationReport,
}

// ============================================================================
// RUN
// ============================================================================

fn aligned_values(raw: &[RawLoss]) -> Vec<f64> {
    raw.iter().map(|l| l.value().unwrap_or(f64::NAN)).collect()
}

/// Calibrate on train/dev and evaluate on test + ood
pub fn run<C, P>(
    config: &DetectorConfig,
    splits: &DatasetSplits,
    losses: &SplitLosses,
    classifier: &mut C,
    tokenizer: &P,
) -> EngineResult<RunReport>
where
    C: Classifier + ?Sized,
    P: Preprocessor + ?Sized,
{
    config.validate()?;
    let ood_label = splits.max_known_label().map_or(0, |l| l + 1);
    let stats_path = config.stats_path();

    // Step 1: populations (counts, sentinel handling)
    let train_pop = LossPopulation::from_raw_losses(&losses.train);
    let dev_pop = LossPopulation::from_raw_losses(&losses.dev);
    let test_pop = LossPopulation::from_raw_losses(&losses.test);
    let ood_pop = LossPopulation::from_raw_losses(&losses.ood);

    // Step 2: normalization, reference stats from train only
    fit_and_persist(train_pop.values(), &stats_path)?;
    let dev_norm = normalize(&aligned_values(&losses.dev), &stats_path, NormalizeMode::Eval)?;
    let test_norm = normalize(&aligned_values(&losses.test), &stats_path, NormalizeMode::Eval)?;
    let ood_norm = normalize(&aligned_values(&losses.ood), &stats_path, NormalizeMode::Eval)?;

    // Evaluation set: test (in-domain) followed by ood
    let mut eval_losses = test_norm.clone();
    eval_losses.extend_from_slice(&ood_norm);
    let mut sentences = splits.test.sentences();
    sentences.extend(splits.ood.sentences());
    let mut true_labels = splits.test.labels_or(ood_label);
    true_labels.extend(std::iter::repeat(ood_label).take(splits.ood.len()));

    let mut threshold = None;
    let mut global_evt = None;
    let mut table = None;
    let mut artifact_path = None;

    // Step 3 + 4
    let (mode, decisions, scores, binary) = if config.class_conditional {
        let dev_labels = splits.dev.labels_or(ood_label);
        let (groups, _skipped) = class_scores(
            classifier,
            tokenizer,
            &dev_norm,
            &splits.dev.sentences(),
            &dev_labels,
            config.max_length,
        )?;

        let mut fitted = match config.evt_variant {
            EvtVariant::Robust => fit_robust(&groups, config.evt_fpr),
            EvtVariant::Standard => fit_standard(&groups, config.evt_fpr).unwrap_or_else(|e| {
                log::warn!("Standard EVT fit failed ({}), using robust fit", e);
                fit_robust(&groups, config.evt_fpr)
            }),
        };

        // Unseen predicted classes fall back to one threshold over all dev scores
        let all_scores: Vec<f64> = groups.values().flatten().copied().collect();
        match fit_global(&all_scores, &config.evt_settings()) {
            Ok(fit) => fitted.insert(ThresholdKey::Global, fit.threshold, fit.model),
            Err(e) => log::warn!("No global fallback threshold: {}", e),
        }

        let path = save_table_at(&fitted, &config.artifacts_dir)?;
        let outcome = predict_class_conditional(
            classifier,
            tokenizer,
            &eval_losses,
            &sentences,
            &fitted,
            ood_label,
            config.max_length,
        )?;

        table = Some(fitted);
        artifact_path = Some(path);
        (DecisionMode::ClassConditional, outcome.decisions, outcome.scores, outcome.binary)
    } else {
        let (mode, t) = if config.use_evt_vae {
            // An all-invalid dev split calibrates on its sentinel loss
            let dev_calibration = if dev_norm.iter().any(|v| v.is_finite()) {
                dev_norm.clone()
            } else {
                log::warn!(
                    "No valid dev losses, calibrating on sentinel loss {}",
                    SENTINEL_HIGH_LOSS
                );
                normalize(dev_pop.values(), &stats_path, NormalizeMode::Eval)?
            };
            let result =
                evt_on_losses(&dev_calibration, &test_norm, &ood_norm, &config.evt_settings())?;
            let mut fitted = ThresholdTable::new();
            fitted.insert(ThresholdKey::Global, result.threshold, result.model.clone());
            artifact_path = Some(save_table_at(&fitted, &config.artifacts_dir)?);

            let t = result.threshold;
            table = Some(fitted);
            global_evt = Some(result);
            (DecisionMode::GlobalEvt, t)
        } else {
            log::info!("Using fixed threshold {}", config.fixed_threshold);
            (DecisionMode::FixedThreshold, config.fixed_threshold)
        };

        threshold = Some(t);
        let decisions = predict(
            classifier,
            tokenizer,
            &eval_losses,
            &sentences,
            t,
            ood_label,
            config.max_length,
        )?;
        let binary = binary_view(&eval_losses, t);
        (mode, decisions, eval_losses, binary)
    };

    let predicted: Vec<u32> = decisions.iter().map(|d| d.predicted_label).collect();
    let evaluation = evaluate(&true_labels, &predicted, &binary, &scores, ood_label)?;

    Ok(RunReport {
        run_id: Uuid::new_v4().to_string(),
        finished_at: Utc::now().to_rfc3339(),
        mode,
        ood_label,
        threshold,
        global_evt,
        table,
        artifact_path,
        train: SplitSummary::from(&train_pop),
        dev: SplitSummary::from(&dev_pop),
        test: SplitSummary::from(&test_pop),
        ood: SplitSummary::from(&ood_pop),
        decisions,
        evaluation,
    })
}
