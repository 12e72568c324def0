//! Ensemble Score Builder
//!
//! `score = alpha * (1 - max_prob) + (1 - alpha) * normalized_loss`.
//! Higher = more anomalous. Alpha is the fixed constant `ENSEMBLE_ALPHA`.

use std::collections::BTreeMap;

use crate::constants::ENSEMBLE_ALPHA;
use super::collector::{RawLoss, ScoredExample};
use super::error::{ModelError, ScoreError};
use super::model::{Classifier, Preprocessor};

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f32::NEG_INFINITY, f32::max) as f64;
    let exps: Vec<f64> = logits.iter().map(|&l| (l as f64 - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Highest softmax probability of a logit vector
pub fn max_softmax_prob(logits: &[f32]) -> Option<f64> {
    if logits.is_empty() {
        return None;
    }
    softmax(logits).into_iter().fold(None, |acc, p| match acc {
        Some(best) if best >= p => Some(best),
        _ => Some(p),
    })
}

/// One ensemble score; NaN/Inf inputs are rejected
pub fn ensemble_score(max_prob: f64, normalized_loss: f64, alpha: f64) -> Option<f64> {
    if !max_prob.is_finite() || !normalized_loss.is_finite() {
        return None;
    }
    let score = alpha * (1.0 - max_prob) + (1.0 - alpha) * normalized_loss;
    score.is_finite().then_some(score)
}

/// Ensemble scores for aligned probability/loss vectors.
/// Fails on the first invalid pair: losses must be filtered upstream.
pub fn build_scores(
    max_probs: &[f64],
    normalized_losses: &[f64],
) -> Result<Vec<f64>, ScoreError> {
    if max_probs.len() != normalized_losses.len() {
        return Err(ScoreError::LengthMismatch {
            probs: max_probs.len(),
            losses: normalized_losses.len(),
        });
    }

    max_probs
        .iter()
        .zip(normalized_losses)
        .enumerate()
        .map(|(index, (&max_prob, &loss))| {
            ensemble_score(max_prob, loss, ENSEMBLE_ALPHA)
                .ok_or(ScoreError::InvalidScore { index, max_prob, loss })
        })
        .collect()
}

/// Run the classifier on one sentence and return its max softmax prob
pub fn classifier_max_prob<C, P>(
    classifier: &mut C,
    tokenizer: &P,
    sentence: &str,
    max_length: usize,
) -> Result<f64, ModelError>
where
    C: Classifier + ?Sized,
    P: Preprocessor + ?Sized,
{
    let inputs = tokenizer.preprocess(sentence, max_length)?;
    let logits = classifier.predict(&inputs)?;
    max_softmax_prob(&logits).ok_or_else(|| ModelError::Inference("empty logits".to_string()))
}

/// Group validation ensemble scores by true class.
///
/// Examples with invalid losses or failed classifier calls are skipped and
/// counted before scoring; the survivors go through `build_scores`, so an
/// invalid pair that slips past the filter surfaces as `ScoreError`.
pub fn class_scores<C, P>(
    classifier: &mut C,
    tokenizer: &P,
    normalized_losses: &[f64],
    sentences: &[String],
    true_classes: &[u32],
    max_length: usize,
) -> Result<(BTreeMap<u32, Vec<f64>>, usize), ScoreError>
where
    C: Classifier + ?Sized,
    P: Preprocessor + ?Sized,
{
    let mut scored: Vec<ScoredExample> = Vec::with_capacity(normalized_losses.len());
    let mut skipped = 0;

    for (index, ((&loss, sentence), &class)) in normalized_losses
        .iter()
        .zip(sentences)
        .zip(true_classes)
        .enumerate()
    {
        let raw_loss = RawLoss::from_value(loss);
        if raw_loss.value().is_none() {
            skipped += 1;
            continue;
        }

        match classifier_max_prob(classifier, tokenizer, sentence, max_length) {
            Ok(p) if p.is_finite() => scored.push(ScoredExample {
                index,
                raw_loss,
                class_label: Some(class),
                classifier_max_prob: p,
            }),
            Ok(p) => {
                log::warn!("Non-finite max probability {} on validation example {}", p, index);
                skipped += 1;
            }
            Err(e) => {
                log::warn!("Classifier failed on validation example {}: {}", index, e);
                skipped += 1;
            }
        }
    }

    let max_probs: Vec<f64> = scored.iter().map(|s| s.classifier_max_prob).collect();
    let losses: Vec<f64> = scored
        .iter()
        .map(|s| s.raw_loss.value().unwrap_or(f64::NAN))
        .collect();
    let scores = build_scores(&max_probs, &losses)?;

    let mut groups: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for (example, score) in scored.iter().zip(scores) {
        if let Some(class) = example.class_label {
            groups.entry(class).or_default().push(score);
        }
    }

    if skipped > 0 {
        log::warn!("Skipped {} validation examples while building ensemble scores", skipped);
    }

    Ok((groups, skipped))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::collector::EncodedBatch;

    #[test]
    fn test_default_weighting() {
        let s = ensemble_score(0.8, 0.4, ENSEMBLE_ALPHA).unwrap();
        assert!((s - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_nan_rejected() {
        assert!(ensemble_score(f64::NAN, 0.1, 0.5).is_none());
        assert!(ensemble_score(0.9, f64::NAN, 0.5).is_none());

        let err = build_scores(&[0.9, 0.9], &[0.1, f64::NAN]).unwrap_err();
        assert!(matches!(err, ScoreError::InvalidScore { index: 1, .. }));
    }

    #[test]
    fn test_length_mismatch() {
        assert!(matches!(
            build_scores(&[0.9], &[0.1, 0.2]),
            Err(ScoreError::LengthMismatch { probs: 1, losses: 2 })
        ));
    }

    #[test]
    fn test_more_uncertain_scores_higher() {
        let scores = build_scores(&[0.99, 0.4], &[0.1, 0.1]).unwrap();
        assert!(scores[1] > scores[0]);
    }

    struct LogitClassifier(Vec<f32>);

    impl Classifier for LogitClassifier {
        fn predict(&mut self, _inputs: &EncodedBatch) -> Result<Vec<f32>, ModelError> {
            Ok(self.0.clone())
        }
    }

    struct ByteTok;

    impl Preprocessor for ByteTok {
        fn preprocess(&self, sentence: &str, max_length: usize) -> Result<EncodedBatch, ModelError> {
            if sentence.is_empty() {
                return Err(ModelError::Preprocess("empty sentence".into()));
            }
            let mut ids: Vec<i64> = sentence.bytes().map(i64::from).take(max_length).collect();
            ids.resize(max_length, 0);
            EncodedBatch::from_rows(ids, vec![1; max_length], vec![0; max_length])
        }
    }

    #[test]
    fn test_class_scores_groups_and_skips() {
        let sentences: Vec<String> = ["a", "b", "", "d"].iter().map(|s| s.to_string()).collect();
        let losses = [0.2, f64::NAN, 0.4, 0.6];
        let classes = [0, 0, 1, 1];

        // logits [0, 0] -> max prob 0.5 -> score = 0.25 + 0.5 * loss
        let mut clf = LogitClassifier(vec![0.0, 0.0]);
        let (groups, skipped) =
            class_scores(&mut clf, &ByteTok, &losses, &sentences, &classes, 4).unwrap();

        // NaN loss and the failed preprocess are skipped
        assert_eq!(skipped, 2);
        assert!((groups[&0][0] - 0.35).abs() < 1e-12);
        assert_eq!(groups[&0].len(), 1);
        assert!((groups[&1][0] - 0.55).abs() < 1e-12);
    }

    #[test]
    fn test_class_scores_skips_nan_probability() {
        let sentences = vec!["a".to_string()];
        let mut clf = LogitClassifier(vec![f32::NAN, f32::NAN]);
        let (groups, skipped) =
            class_scores(&mut clf, &ByteTok, &[0.1], &sentences, &[0], 4).unwrap();
        assert!(groups.is_empty());
        assert_eq!(skipped, 1);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(p[2] > p[1] && p[1] > p[0]);
    }

    #[test]
    fn test_max_prob_of_large_logits_is_stable() {
        let p = max_softmax_prob(&[1000.0, 0.0]).unwrap();
        assert!((p - 1.0).abs() < 1e-9);
        assert!(max_softmax_prob(&[]).is_none());
    }
}
