//! Decision Procedure
//!
//! Loss at or below the threshold goes to the classifier, anything above is
//! rejected with the reserved OOD label. Invalid losses never pass the
//! comparison and are rejected too.

use serde::{Deserialize, Serialize};

use super::ensemble::{ensemble_score, max_softmax_prob};
use super::error::{EngineError, EngineResult};
use super::model::{Classifier, Preprocessor, ThresholdTable};
use crate::constants::ENSEMBLE_ALPHA;

/// Per-example outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub predicted_label: u32,
    pub is_ood: bool,
}

impl Decision {
    fn ood(ood_label: u32) -> Self {
        Self { predicted_label: ood_label, is_ood: true }
    }

    fn known(label: u32) -> Self {
        Self { predicted_label: label, is_ood: false }
    }
}

/// Index of the first maximum; NaN entries are ignored
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if b >= v => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

fn check_lengths(left: usize, right: usize) -> EngineResult<()> {
    if left != right {
        return Err(EngineError::LengthMismatch { left, right });
    }
    Ok(())
}

fn classify<C, P>(
    classifier: &mut C,
    tokenizer: &P,
    sentence: &str,
    max_length: usize,
) -> Option<Vec<f32>>
where
    C: Classifier + ?Sized,
    P: Preprocessor + ?Sized,
{
    let result = tokenizer
        .preprocess(sentence, max_length)
        .and_then(|inputs| classifier.predict(&inputs));

    match result {
        Ok(logits) => Some(logits),
        Err(e) => {
            log::warn!("Classifier failed, emitting OOD: {}", e);
            None
        }
    }
}

/// Global-threshold prediction.
///
/// `loss <= threshold` emits the classifier argmax, otherwise `ood_label`.
/// A classifier failure on an accepted example also emits `ood_label`.
pub fn predict<C, P>(
    classifier: &mut C,
    tokenizer: &P,
    losses: &[f64],
    sentences: &[String],
    threshold: f64,
    ood_label: u32,
    max_length: usize,
) -> EngineResult<Vec<Decision>>
where
    C: Classifier + ?Sized,
    P: Preprocessor + ?Sized,
{
    check_lengths(losses.len(), sentences.len())?;

    let decisions = losses
        .iter()
        .zip(sentences)
        .map(|(&loss, sentence)| {
            if !(loss <= threshold) {
                return Decision::ood(ood_label);
            }
            classify(classifier, tokenizer, sentence, max_length)
                .and_then(|logits| argmax(&logits))
                .map(|idx| Decision::known(idx as u32))
                .unwrap_or(Decision::ood(ood_label))
        })
        .collect();

    Ok(decisions)
}

/// Class-conditional prediction with ensemble scores.
///
/// Returns the decisions and each example's ensemble score (NaN when it
/// could not be computed).
/// Class-conditional output, aligned per example
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalOutcome {
    pub decisions: Vec<Decision>,
    /// Ensemble scores, NaN where no score could be formed
    pub scores: Vec<f64>,
    /// 1 = score above its class threshold (or no score / no threshold)
    pub binary: Vec<u8>,
}

pub fn predict_class_conditional<C, P>(
    classifier: &mut C,
    tokenizer: &P,
    normalized_losses: &[f64],
    sentences: &[String],
    table: &ThresholdTable,
    ood_label: u32,
    max_length: usize,
) -> EngineResult<ConditionalOutcome>
where
    C: Classifier + ?Sized,
    P: Preprocessor + ?Sized,
{
    check_lengths(normalized_losses.len(), sentences.len())?;

    let mut decisions = Vec::with_capacity(sentences.len());
    let mut scores = Vec::with_capacity(sentences.len());
    let mut binary = Vec::with_capacity(sentences.len());

    for (&loss, sentence) in normalized_losses.iter().zip(sentences) {
        let Some(logits) = classify(classifier, tokenizer, sentence, max_length) else {
            decisions.push(Decision::ood(ood_label));
            scores.push(f64::NAN);
            binary.push(1);
            continue;
        };

        let predicted = argmax(&logits).map(|i| i as u32);
        let score = max_softmax_prob(&logits).and_then(|p| ensemble_score(p, loss, ENSEMBLE_ALPHA));

        let decision = match (predicted, score) {
            (Some(class), Some(s)) => match table.threshold_for(class) {
                Some(t) if s <= t => Decision::known(class),
                Some(_) => Decision::ood(ood_label),
                None => {
                    log::warn!("No threshold for class {}, emitting OOD", class);
                    Decision::ood(ood_label)
                }
            },
            _ => Decision::ood(ood_label),
        };

        binary.push(u8::from(decision.is_ood));
        decisions.push(decision);
        scores.push(score.unwrap_or(f64::NAN));
    }

    Ok(ConditionalOutcome { decisions, scores, binary })
}

/// Binary view for evaluation: 1 = OOD (`loss > threshold`), 0 = in-domain
pub fn binary_view(losses: &[f64], threshold: f64) -> Vec<u8> {
    losses.iter().map(|&l| u8::from(!(l <= threshold))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::collector::EncodedBatch;
    use crate::logic::error::ModelError;
    use crate::logic::model::{FittedModel, ThresholdKey, FallbackReason};

    struct FixedClassifier {
        logits: Vec<f32>,
        calls: usize,
    }

    impl Classifier for FixedClassifier {
        fn predict(&mut self, _inputs: &EncodedBatch) -> Result<Vec<f32>, ModelError> {
            self.calls += 1;
            Ok(self.logits.clone())
        }
    }

    struct FailingClassifier;

    impl Classifier for FailingClassifier {
        fn predict(&mut self, _inputs: &EncodedBatch) -> Result<Vec<f32>, ModelError> {
            Err(ModelError::Inference("boom".into()))
        }
    }

    struct Tok;

    impl Preprocessor for Tok {
        fn preprocess(&self, sentence: &str, max_length: usize) -> Result<EncodedBatch, ModelError> {
            let mut ids: Vec<i64> = sentence.bytes().map(i64::from).take(max_length).collect();
            ids.resize(max_length, 0);
            let mask = vec![1; max_length];
            let types = vec![0; max_length];
            EncodedBatch::from_rows(ids, mask, types)
        }
    }

    fn sentences(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("sentence {}", i)).collect()
    }

    #[test]
    fn test_argmax_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), Some(1));
        assert_eq!(argmax(&[f32::NAN, 0.3]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_below_threshold_uses_classifier() {
        let mut clf = FixedClassifier { logits: vec![0.1, 2.0, 0.3], calls: 0 };
        let out = predict(&mut clf, &Tok, &[0.1, 0.5], &sentences(2), 0.2, 3, 8).unwrap();

        assert_eq!(out[0], Decision { predicted_label: 1, is_ood: false });
        assert_eq!(out[1], Decision { predicted_label: 3, is_ood: true });
        // Rejected examples never reach the classifier
        assert_eq!(clf.calls, 1);
    }

    #[test]
    fn test_loss_equal_to_threshold_is_accepted() {
        let mut clf = FixedClassifier { logits: vec![1.0, 0.0], calls: 0 };
        let out = predict(&mut clf, &Tok, &[0.2], &sentences(1), 0.2, 2, 8).unwrap();
        assert!(!out[0].is_ood);
    }

    #[test]
    fn test_monotonicity() {
        let mut clf = FixedClassifier { logits: vec![0.0, 0.0, 5.0], calls: 0 };
        let s = sentences(3);
        let threshold = 0.3;

        let before = predict(&mut clf, &Tok, &[0.1, 0.25, 0.2], &s, threshold, 9, 8).unwrap();
        let after = predict(&mut clf, &Tok, &[0.1, 0.35, 0.2], &s, threshold, 9, 8).unwrap();

        assert_eq!(before[1].predicted_label, 2);
        assert_eq!(after[1].predicted_label, 9);
        assert_eq!(before[0], after[0]);
        assert_eq!(before[2], after[2]);
    }

    #[test]
    fn test_invalid_loss_is_ood() {
        let mut clf = FixedClassifier { logits: vec![1.0], calls: 0 };
        let out = predict(&mut clf, &Tok, &[f64::NAN], &sentences(1), 100.0, 1, 8).unwrap();
        assert!(out[0].is_ood);
    }

    #[test]
    fn test_classifier_failure_emits_ood() {
        let out = predict(&mut FailingClassifier, &Tok, &[0.0], &sentences(1), 0.5, 4, 8).unwrap();
        assert_eq!(out[0], Decision { predicted_label: 4, is_ood: true });
    }

    #[test]
    fn test_length_mismatch() {
        let mut clf = FixedClassifier { logits: vec![1.0], calls: 0 };
        assert!(matches!(
            predict(&mut clf, &Tok, &[0.1, 0.2], &sentences(1), 0.5, 1, 8),
            Err(EngineError::LengthMismatch { left: 2, right: 1 })
        ));
    }

    #[test]
    fn test_binary_view() {
        assert_eq!(binary_view(&[0.1, 0.3, f64::NAN, 0.2], 0.2), vec![0, 1, 1, 0]);
    }

    #[test]
    fn test_class_conditional_uses_class_threshold() {
        let mut table = ThresholdTable::new();
        let model = FittedModel::Percentile {
            value: 0.0,
            percentile: 95.0,
            reason: FallbackReason::InsufficientSamples { count: 3 },
        };
        table.insert(ThresholdKey::Class(0), 0.3, model.clone());
        table.insert(ThresholdKey::Global, 0.05, model);

        // Confident class 0: score = 0.5 * (1 - ~1.0) + 0.5 * loss
        let mut clf = FixedClassifier { logits: vec![20.0, 0.0], calls: 0 };
        let outcome = predict_class_conditional(
            &mut clf, &Tok, &[0.2, 0.9], &sentences(2), &table, 2, 8,
        )
        .unwrap();

        assert_eq!(outcome.decisions[0], Decision { predicted_label: 0, is_ood: false });
        assert!(outcome.decisions[1].is_ood);
        assert!((outcome.scores[0] - 0.1).abs() < 1e-6);
        assert_eq!(outcome.binary, vec![0, 1]);

        // Class 1 has no entry: global threshold applies
        let mut clf = FixedClassifier { logits: vec![0.0, 20.0], calls: 0 };
        let outcome = predict_class_conditional(
            &mut clf, &Tok, &[0.2], &sentences(1), &table, 2, 8,
        )
        .unwrap();
        assert!(outcome.decisions[0].is_ood);
        assert_eq!(outcome.binary, vec![1]);
    }
}
