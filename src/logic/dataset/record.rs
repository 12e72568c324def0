use serde::{Deserialize, Serialize};

use crate::logic::collector::EncodedBatch;
use crate::logic::error::ModelError;

/// One example of a split, pre-tokenized
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExampleRecord {
    pub sentence: String,

    // ✅ Ground truth (absent on unlabeled OOD data)
    #[serde(default)]
    pub label: Option<u32>,

    // ✅ Model inputs
    pub input_ids: Vec<i64>,
    #[serde(default)]
    pub attention_mask: Vec<i64>,
    #[serde(default)]
    pub token_type_ids: Vec<i64>,

    // ✅ Recorded model outputs (replay runs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logits: Option<Vec<f32>>,
}

/// Pad with `pad` or truncate to exactly `len`
pub fn fit_to_length(mut values: Vec<i64>, len: usize, pad: i64) -> Vec<i64> {
    values.truncate(len);
    values.resize(len, pad);
    values
}

impl ExampleRecord {
    /// Encode as a single-row batch of `max_length` tokens.
    /// A missing mask means every id is attended; missing types are zero.
    pub fn encode(&self, max_length: usize) -> Result<EncodedBatch, ModelError> {
        let mask = if self.attention_mask.is_empty() {
            vec![1; self.input_ids.len()]
        } else {
            self.attention_mask.clone()
        };
        let types = if self.token_type_ids.is_empty() {
            vec![0; self.input_ids.len()]
        } else {
            self.token_type_ids.clone()
        };

        EncodedBatch::from_rows(
            fit_to_length(self.input_ids.clone(), max_length, 0),
            fit_to_length(mask, max_length, 0),
            fit_to_length(types, max_length, 0),
        )
    }
}
