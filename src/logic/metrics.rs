//! Evaluation metrics
//!
//! Macro/micro F1 for the multiclass and binary (OOD vs in-domain) views,
//! and AUC-ROC of the binary ground truth against the decision scores.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub multiclass_macro_f1: f64,
    pub multiclass_micro_f1: f64,
    pub binary_macro_f1: f64,
    pub binary_micro_f1: f64,
    /// None when the truth holds a single class
    pub auc_roc: Option<f64>,
    pub support: usize,
    pub ood_support: usize,
}

fn per_label_f1<T: Ord + Copy>(truth: &[T], pred: &[T], label: T) -> f64 {
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    for (&t, &p) in truth.iter().zip(pred) {
        match (t == label, p == label) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
    }
    let denom = 2 * tp + fp + fn_;
    if denom == 0 { 0.0 } else { 2.0 * tp as f64 / denom as f64 }
}

/// Unweighted mean of per-label F1 over every label seen in truth or prediction
pub fn macro_f1<T: Ord + Copy>(truth: &[T], pred: &[T]) -> f64 {
    let labels: BTreeSet<T> = truth.iter().chain(pred).copied().collect();
    if labels.is_empty() {
        return 0.0;
    }
    let sum: f64 = labels.iter().map(|&l| per_label_f1(truth, pred, l)).sum();
    sum / labels.len() as f64
}

/// Micro F1 over single-label predictions (equals accuracy)
pub fn micro_f1<T: Eq>(truth: &[T], pred: &[T]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let correct = truth.iter().zip(pred).filter(|(t, p)| t == p).count();
    correct as f64 / truth.len() as f64
}

/// AUC-ROC via the Mann-Whitney statistic with tied ranks averaged.
/// NaN scores rank as the most anomalous.
pub fn auc_roc(truth: &[u8], scores: &[f64]) -> Option<f64> {
    let positives = truth.iter().filter(|&&t| t == 1).count();
    let negatives = truth.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut ranked: Vec<(f64, u8)> = scores
        .iter()
        .map(|&s| if s.is_nan() { f64::INFINITY } else { s })
        .zip(truth.iter().copied())
        .collect();
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < ranked.len() {
        let mut j = i;
        while j + 1 < ranked.len() && ranked[j + 1].0 == ranked[i].0 {
            j += 1;
        }
        // Ranks i+1..=j+1 share their average
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        let tied_positives = ranked[i..=j].iter().filter(|(_, t)| *t == 1).count();
        rank_sum += avg_rank * tied_positives as f64;
        i = j + 1;
    }

    let p = positives as f64;
    Some((rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64))
}

/// Full evaluation of one prediction run.
///
/// Binary truth is `true_label == ood_label`. `bin_pred` is the score-vs-threshold
/// view (1 = OOD), independent of the multiclass labels; `scores` rank
/// OOD-ness for the AUC.
pub fn evaluate(
    true_labels: &[u32],
    predicted: &[u32],
    bin_pred: &[u8],
    scores: &[f64],
    ood_label: u32,
) -> EngineResult<EvaluationReport> {
    for len in [predicted.len(), bin_pred.len(), scores.len()] {
        if len != true_labels.len() {
            return Err(EngineError::LengthMismatch { left: true_labels.len(), right: len });
        }
    }

    let bin_truth: Vec<u8> = true_labels.iter().map(|&l| u8::from(l == ood_label)).collect();

    let auc = auc_roc(&bin_truth, scores);
    if auc.is_none() {
        log::warn!("AUC-ROC undefined: only one class present in binary ground truth");
    }

    let report = EvaluationReport {
        multiclass_macro_f1: macro_f1(true_labels, predicted),
        multiclass_micro_f1: micro_f1(true_labels, predicted),
        binary_macro_f1: macro_f1(&bin_truth, bin_pred),
        binary_micro_f1: micro_f1(&bin_truth, bin_pred),
        auc_roc: auc,
        support: true_labels.len(),
        ood_support: bin_truth.iter().filter(|&&t| t == 1).count(),
    };

    log::info!(
        "Multiclass F1 macro={:.4} micro={:.4} | Binary F1 macro={:.4} micro={:.4} | AUC={}",
        report.multiclass_macro_f1,
        report.multiclass_micro_f1,
        report.binary_macro_f1,
        report.binary_micro_f1,
        report.auc_roc.map(|a| format!("{:.4}", a)).unwrap_or_else(|| "n/a".into())
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_predictions() {
        let truth = [0u32, 1, 2, 2];
        assert_eq!(macro_f1(&truth, &truth), 1.0);
        assert_eq!(micro_f1(&truth, &truth), 1.0);
    }

    #[test]
    fn test_macro_f1_known_value() {
        // label 0: tp=1 fp=1 fn=0 -> 2/3 ; label 1: tp=0 fp=0 fn=1 -> 0 ; label 2: 1
        let truth = [0u32, 1, 2];
        let pred = [0u32, 0, 2];
        let expected = (2.0 / 3.0 + 0.0 + 1.0) / 3.0;
        assert!((macro_f1(&truth, &pred) - expected).abs() < 1e-12);
        assert!((micro_f1(&truth, &pred) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_auc_perfect_and_inverted() {
        let truth = [0u8, 0, 1, 1];
        assert_eq!(auc_roc(&truth, &[0.1, 0.2, 0.8, 0.9]), Some(1.0));
        assert_eq!(auc_roc(&truth, &[0.9, 0.8, 0.2, 0.1]), Some(0.0));
    }

    #[test]
    fn test_auc_ties_count_half() {
        let truth = [0u8, 1];
        assert_eq!(auc_roc(&truth, &[0.5, 0.5]), Some(0.5));
    }

    #[test]
    fn test_auc_single_class_is_none() {
        assert_eq!(auc_roc(&[0, 0, 0], &[0.1, 0.2, 0.3]), None);
    }

    #[test]
    fn test_evaluate_binary_view() {
        // ood label = 2
        let truth = [0u32, 1, 2, 2];
        let pred = [0u32, 1, 2, 2];
        let scores = [0.05, 0.05, 0.9, 0.9];

        let report = evaluate(&truth, &pred, &[0, 0, 1, 1], &scores, 2).unwrap();
        assert_eq!(report.binary_macro_f1, 1.0);
        assert_eq!(report.auc_roc, Some(1.0));
        assert_eq!(report.ood_support, 2);
    }

    #[test]
    fn test_binary_view_ignores_multiclass_labels() {
        // Every label wrong, every threshold comparison right
        let truth = [0u32, 1, 2, 2];
        let pred = [2u32, 2, 0, 1];
        let scores = [0.05, 0.1, 0.8, 0.9];

        let report = evaluate(&truth, &pred, &[0, 0, 1, 1], &scores, 2).unwrap();
        assert_eq!(report.multiclass_micro_f1, 0.0);
        assert_eq!(report.binary_macro_f1, 1.0);
        assert_eq!(report.binary_micro_f1, 1.0);
    }

    #[test]
    fn test_evaluate_length_mismatch() {
        assert!(evaluate(&[0, 1], &[0], &[0, 0], &[0.1, 0.2], 2).is_err());
        assert!(evaluate(&[0, 1], &[0, 1], &[0], &[0.1, 0.2], 2).is_err());
    }
}
