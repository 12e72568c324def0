//! Replay collaborators
//!
//! Serve losses/logits recorded alongside the dataset so a calibration run
//! can be reproduced without loading any model.

use std::collections::HashMap;

use crate::logic::collector::{EncodedBatch, ForwardOutput, ScoringModel};
use crate::logic::error::ModelError;
use super::Classifier;

/// Plays back recorded losses in call order. A missing record (`None`)
/// registers no loss, a NaN record registers NaN.
#[derive(Debug, Clone)]
pub struct ReplayScorer {
    losses: Vec<Option<f64>>,
    cursor: usize,
}

impl ReplayScorer {
    pub fn new(losses: Vec<Option<f64>>) -> Self {
        Self { losses, cursor: 0 }
    }
}

impl ScoringModel for ReplayScorer {
    fn eval_mode(&mut self) {
        self.cursor = 0;
    }

    fn forward(&mut self, _batch: &EncodedBatch) -> Result<ForwardOutput, ModelError> {
        let step = self.cursor;
        let recorded = self
            .losses
            .get(step)
            .ok_or(ModelError::ReplayExhausted(step))?;
        self.cursor += 1;

        Ok(ForwardOutput {
            output: vec![],
            registered_losses: recorded.iter().copied().collect(),
        })
    }
}

/// Recorded logits keyed by the encoded input ids
#[derive(Debug, Clone, Default)]
pub struct ReplayClassifier {
    logits: HashMap<Vec<i64>, Vec<f32>>,
}

impl ReplayClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, inputs: &EncodedBatch, logits: Vec<f32>) {
        self.logits.insert(Self::key(inputs), logits);
    }

    pub fn len(&self) -> usize {
        self.logits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logits.is_empty()
    }

    fn key(inputs: &EncodedBatch) -> Vec<i64> {
        inputs.input_ids.row(0).to_vec()
    }
}

impl Classifier for ReplayClassifier {
    fn predict(&mut self, inputs: &EncodedBatch) -> Result<Vec<f32>, ModelError> {
        self.logits
            .get(&Self::key(inputs))
            .cloned()
            .ok_or_else(|| ModelError::Inference("no recorded logits for input".to_string()))
    }
}
