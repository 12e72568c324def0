//! Dataset Module - Pre-tokenized example splits
//!
//! Mỗi split là một file JSONL (`train`, `dev`, `test`, `ood`), mỗi dòng một
//! `ExampleRecord`. Records carry token ids and, optionally, the losses and
//! logits recorded by the models for replay runs.

pub mod record;
pub mod reader;
pub mod tokenizer;


pub use reader::{load_splits, read_split, DatasetSplits, Split, SPLIT_NAMES};
pub use record::ExampleRecord;
pub use tokenizer::RecordTokenizer;

use crate::logic::model::{ReplayClassifier, ReplayScorer};

/// Replay collaborators built from the recorded outputs of a split set.
///
/// The scorer replays one split's losses; build one per split.
pub fn replay_scorer(split: &Split) -> ReplayScorer {
    ReplayScorer::new(split.recorded_losses())
}

/// Classifier answering with the logits recorded for each encoded input
pub fn replay_classifier(splits: &DatasetSplits, max_length: usize) -> ReplayClassifier {
    let mut classifier = ReplayClassifier::new();
    for record in splits.iter().flat_map(|s| s.records.iter()) {
        let Some(logits) = &record.logits else { continue };
        match record.encode(max_length) {
            Ok(inputs) => classifier.insert(&inputs, logits.clone()),
            Err(e) => log::warn!("Cannot encode '{}': {}", record.sentence, e),
        }
    }
    log::info!("Replay classifier holds {} recorded logit vectors", classifier.len());
    classifier
}
