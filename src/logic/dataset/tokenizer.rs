use std::collections::HashMap;

use crate::logic::collector::EncodedBatch;
use crate::logic::error::ModelError;
use crate::logic::model::Preprocessor;
use super::reader::DatasetSplits;
use super::record::ExampleRecord;

/// Serves the pre-tokenized ids recorded with each sentence
#[derive(Debug, Clone, Default)]
pub struct RecordTokenizer {
    by_sentence: HashMap<String, ExampleRecord>,
}

impl RecordTokenizer {
    pub fn from_splits(splits: &DatasetSplits) -> Self {
        let mut by_sentence = HashMap::new();
        for split in splits.iter() {
            for record in &split.records {
                by_sentence.entry(record.sentence.clone()).or_insert_with(|| record.clone());
            }
        }
        Self { by_sentence }
    }

    pub fn len(&self) -> usize {
        self.by_sentence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sentence.is_empty()
    }
}

impl Preprocessor for RecordTokenizer {
    fn preprocess(&self, sentence: &str, max_length: usize) -> Result<EncodedBatch, ModelError> {
        self.by_sentence
            .get(sentence)
            .ok_or_else(|| ModelError::Preprocess(format!("no tokens recorded for '{}'", sentence)))?
            .encode(max_length)
    }
}
