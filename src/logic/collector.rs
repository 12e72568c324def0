//! Loss Collector - Per-example reconstruction loss
//!
//! Chạy từng batch qua scoring model (inference mode), lấy scalar loss
//! mà model đã đăng ký, bỏ qua giá trị lỗi (NaN/Inf/exception) và đếm lại.
//!
//! One forward call scores one unit: callers batch examples one per batch,
//! so "example" and "batch" are the same thing here.

use std::fmt;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::constants::SENTINEL_HIGH_LOSS;
use super::error::ModelError;

// ============================================================================
// INPUT TENSORS
// ============================================================================

/// Three aligned model-input tensors (batch x seq_len)
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBatch {
    pub input_ids: Array2<i64>,
    pub attention_mask: Array2<i64>,
    pub token_type_ids: Array2<i64>,
}

impl EncodedBatch {
    pub fn new(
        input_ids: Array2<i64>,
        attention_mask: Array2<i64>,
        token_type_ids: Array2<i64>,
    ) -> Result<Self, ModelError> {
        if input_ids.dim() != attention_mask.dim() || input_ids.dim() != token_type_ids.dim() {
            return Err(ModelError::Tensor(format!(
                "misaligned tensors: ids {:?}, mask {:?}, types {:?}",
                input_ids.dim(),
                attention_mask.dim(),
                token_type_ids.dim()
            )));
        }
        Ok(Self { input_ids, attention_mask, token_type_ids })
    }

    /// Single-example batch from flat rows
    pub fn from_rows(
        input_ids: Vec<i64>,
        attention_mask: Vec<i64>,
        token_type_ids: Vec<i64>,
    ) -> Result<Self, ModelError> {
        let to_row = |v: Vec<i64>| {
            let len = v.len();
            Array2::from_shape_vec((1, len), v).map_err(|e| ModelError::Tensor(e.to_string()))
        };
        Self::new(to_row(input_ids)?, to_row(attention_mask)?, to_row(token_type_ids)?)
    }

    pub fn batch_size(&self) -> usize {
        self.input_ids.nrows()
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.ncols()
    }
}

// ============================================================================
// SCORING MODEL CONTRACT
// ============================================================================

/// Output of one forward pass: model output plus the losses the model
/// registered during the call (expected: exactly one scalar).
/// Losses are kept in f64 so recorded values replay bit-for-bit.
#[derive(Debug, Clone, Default)]
pub struct ForwardOutput {
    pub output: Vec<f32>,
    pub registered_losses: Vec<f64>,
}

/// Trait cho scoring models (VAE over ONNX, replay, ...)
pub trait ScoringModel {
    /// Switch to inference mode: no parameter updates, no dropout
    fn eval_mode(&mut self);

    fn forward(&mut self, batch: &EncodedBatch) -> Result<ForwardOutput, ModelError>;
}

// ============================================================================
// PER-EXAMPLE OUTCOME
// ============================================================================

/// Why an example did not produce a usable loss
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkipReason {
    ModelFailure(String),
    NoLossRegistered,
    NonFinite(f64),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ModelFailure(msg) => write!(f, "model failure: {}", msg),
            SkipReason::NoLossRegistered => write!(f, "no loss registered"),
            SkipReason::NonFinite(v) => write!(f, "non-finite loss {}", v),
        }
    }
}

/// Raw loss of one example: a finite real or explicitly invalid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawLoss {
    Valid(f64),
    Invalid(SkipReason),
}

impl RawLoss {
    pub fn from_value(value: f64) -> Self {
        if value.is_finite() {
            RawLoss::Valid(value)
        } else {
            RawLoss::Invalid(SkipReason::NonFinite(value))
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            RawLoss::Valid(v) => Some(*v),
            RawLoss::Invalid(_) => None,
        }
    }
}

impl From<Result<f64, SkipReason>> for RawLoss {
    fn from(r: Result<f64, SkipReason>) -> Self {
        match r {
            Ok(v) => RawLoss::Valid(v),
            Err(reason) => RawLoss::Invalid(reason),
        }
    }
}

/// One scored example as it flows through the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredExample {
    pub index: usize,
    pub raw_loss: RawLoss,
    pub class_label: Option<u32>,
    pub classifier_max_prob: f64,
}

// ============================================================================
// POPULATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedExample {
    pub index: usize,
    pub reason: SkipReason,
}

/// Valid raw losses of one split plus what was excluded.
/// Immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossPopulation {
    values: Vec<f64>,
    skipped: Vec<SkippedExample>,
    total_seen: usize,
    all_invalid: bool,
}

impl LossPopulation {
    /// Aggregate per-example outcomes, in example order
    pub fn from_outcomes<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = (usize, Result<f64, SkipReason>)>,
    {
        let mut values = Vec::new();
        let mut skipped = Vec::new();
        let mut total_seen = 0;

        for (index, outcome) in outcomes {
            total_seen += 1;
            match outcome {
                Ok(v) => values.push(v),
                Err(reason) => skipped.push(SkippedExample { index, reason }),
            }
        }

        let all_invalid = values.is_empty();
        if all_invalid {
            log::error!(
                "All {} losses were invalid, substituting sentinel loss {}",
                total_seen,
                SENTINEL_HIGH_LOSS
            );
            values.push(SENTINEL_HIGH_LOSS);
        } else if !skipped.is_empty() {
            log::warn!("Skipped {} samples due to invalid losses", skipped.len());
        }

        Self { values, skipped, total_seen, all_invalid }
    }

    /// Population from aligned per-example outcomes
    pub fn from_raw_losses(raw: &[RawLoss]) -> Self {
        Self::from_outcomes(raw.iter().enumerate().map(|(i, loss)| {
            let outcome = match loss {
                RawLoss::Valid(v) => Ok(*v),
                RawLoss::Invalid(reason) => Err(reason.clone()),
            };
            (i, outcome)
        }))
    }

    /// Population from precomputed raw values; NaN/Inf are marked invalid
    pub fn from_raw(raw: &[f64]) -> Self {
        let losses: Vec<RawLoss> = raw.iter().map(|&v| RawLoss::from_value(v)).collect();
        Self::from_raw_losses(&losses)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn skipped(&self) -> &[SkippedExample] {
        &self.skipped
    }

    pub fn valid_count(&self) -> usize {
        if self.all_invalid { 0 } else { self.values.len() }
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn total_seen(&self) -> usize {
        self.total_seen
    }

    /// True when every example was invalid and `values` holds the sentinel
    pub fn is_sentinel(&self) -> bool {
        self.all_invalid
    }
}

// ============================================================================
// COLLECTION
// ============================================================================

/// Run one batch and pull out its registered scalar loss
pub fn extract_loss<M: ScoringModel + ?Sized>(
    model: &mut M,
    batch: &EncodedBatch,
) -> Result<f64, SkipReason> {
    let output = model
        .forward(batch)
        .map_err(|e| SkipReason::ModelFailure(e.to_string()))?;

    let loss = output
        .registered_losses
        .first()
        .copied()
        .ok_or(SkipReason::NoLossRegistered)?;

    if loss.is_finite() {
        Ok(loss)
    } else {
        Err(SkipReason::NonFinite(loss))
    }
}

/// Score every batch, keeping one outcome per example in input order
pub fn score_examples<'a, M, I>(model: &mut M, batches: I) -> Vec<RawLoss>
where
    M: ScoringModel + ?Sized,
    I: IntoIterator<Item = &'a EncodedBatch>,
{
    model.eval_mode();

    batches
        .into_iter()
        .enumerate()
        .map(|(step, batch)| {
            let outcome = extract_loss(model, batch);
            if let Err(reason) = &outcome {
                log::warn!("Skipping step {}: {}", step, reason);
            }
            RawLoss::from(outcome)
        })
        .collect()
}

/// Score every batch; a failing example is skipped, never fatal
pub fn collect_losses<'a, M, I>(model: &mut M, batches: I) -> LossPopulation
where
    M: ScoringModel + ?Sized,
    I: IntoIterator<Item = &'a EncodedBatch>,
{
    let raw = score_examples(model, batches);
    let population = LossPopulation::from_raw_losses(&raw);
    log::info!(
        "Collected {} valid losses ({} skipped, {} seen)",
        population.valid_count(),
        population.skipped_count(),
        population.total_seen()
    );
    population
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Scorer that plays back a fixed script of outcomes
    struct ScriptedScorer {
        script: Vec<Result<Vec<f64>, ModelError>>,
        calls: usize,
        eval: bool,
    }

    impl ScriptedScorer {
        fn new(script: Vec<Result<Vec<f64>, ModelError>>) -> Self {
            Self { script, calls: 0, eval: false }
        }
    }

    impl ScoringModel for ScriptedScorer {
        fn eval_mode(&mut self) {
            self.eval = true;
        }

        fn forward(&mut self, _batch: &EncodedBatch) -> Result<ForwardOutput, ModelError> {
            assert!(self.eval, "forward called outside inference mode");
            let step = self.calls;
            self.calls += 1;
            match self.script.get(step) {
                Some(Ok(losses)) => Ok(ForwardOutput {
                    output: vec![],
                    registered_losses: losses.clone(),
                }),
                Some(Err(e)) => Err(ModelError::Inference(e.to_string())),
                None => Err(ModelError::ReplayExhausted(step)),
            }
        }
    }

    fn batches(n: usize) -> Vec<EncodedBatch> {
        (0..n)
            .map(|i| EncodedBatch::from_rows(vec![101, i as i64, 102], vec![1; 3], vec![0; 3]).unwrap())
            .collect()
    }

    #[test]
    fn test_skips_invalid_and_counts() {
        let mut scorer = ScriptedScorer::new(vec![
            Ok(vec![0.5]),
            Ok(vec![f64::NAN]),
            Err(ModelError::Inference("boom".into())),
            Ok(vec![]),
            Ok(vec![1.5]),
            Ok(vec![f64::INFINITY]),
        ]);
        let data = batches(6);

        let pop = collect_losses(&mut scorer, &data);

        assert_eq!(pop.values(), &[0.5, 1.5]);
        assert_eq!(pop.valid_count(), 2);
        assert_eq!(pop.skipped_count(), 4);
        assert_eq!(pop.valid_count() + pop.skipped_count(), pop.total_seen());
        assert!(!pop.is_sentinel());
        assert_eq!(pop.skipped()[2].reason, SkipReason::NoLossRegistered);
        assert!(matches!(pop.skipped()[1].reason, SkipReason::ModelFailure(_)));
    }

    #[test]
    fn test_all_invalid_returns_sentinel() {
        let mut scorer = ScriptedScorer::new((0..4).map(|_| Ok(vec![f64::NAN])).collect());
        let pop = collect_losses(&mut scorer, &batches(4));

        assert_eq!(pop.values(), &[SENTINEL_HIGH_LOSS]);
        assert!(pop.is_sentinel());
        assert_eq!(pop.valid_count(), 0);
        assert_eq!(pop.skipped_count(), 4);
    }

    #[test]
    fn test_uses_first_registered_loss() {
        let mut scorer = ScriptedScorer::new(vec![Ok(vec![0.25, 9.0])]);
        let pop = collect_losses(&mut scorer, &batches(1));
        assert_eq!(pop.values(), &[0.25]);
    }

    #[test]
    fn test_from_raw_marks_non_finite() {
        let pop = LossPopulation::from_raw(&[0.1, f64::NAN, 0.3, f64::NEG_INFINITY]);
        assert_eq!(pop.values(), &[0.1, 0.3]);
        assert_eq!(pop.total_seen(), 4);
        assert_eq!(pop.skipped()[0].index, 1);
    }

    #[test]
    fn test_score_examples_keeps_alignment() {
        let mut scorer = ScriptedScorer::new(vec![Ok(vec![0.2]), Ok(vec![f64::NAN]), Ok(vec![0.4])]);
        let raw = score_examples(&mut scorer, &batches(3));

        assert_eq!(raw.len(), 3);
        assert_eq!(raw[0].value(), Some(0.2));
        assert!(raw[1].value().is_none());
        assert_eq!(raw[2].value(), Some(0.4));
    }

    #[test]
    fn test_misaligned_batch_rejected() {
        let ids = Array2::<i64>::zeros((1, 4));
        let mask = Array2::<i64>::zeros((1, 3));
        let types = Array2::<i64>::zeros((1, 4));
        assert!(EncodedBatch::new(ids, mask, types).is_err());
    }
}
