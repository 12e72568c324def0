//! Model Module - External collaborators & threshold artifacts
//!
//! Tách model collaborators khỏi decision logic.
//! Dễ dàng swap model: ONNX Runtime cho live inference, replay cho recorded runs.

pub mod inference;
pub mod replay;
pub mod threshold;

use super::collector::EncodedBatch;
use super::error::ModelError;

// Re-export common types
pub use inference::{ModelMetadata, OnnxClassifier, OnnxScorer};
pub use replay::{ReplayClassifier, ReplayScorer};
pub use threshold::{
    load_table, save_table, save_table_at, FallbackReason, FittedModel, ThresholdKey,
    ThresholdTable,
};

/// Intent classifier, assumed calibrated upstream
pub trait Classifier {
    /// Logits for the first (only) row of `inputs`
    fn predict(&mut self, inputs: &EncodedBatch) -> Result<Vec<f32>, ModelError>;
}

/// Tokenizer/preprocessing collaborator
pub trait Preprocessor {
    fn preprocess(&self, sentence: &str, max_length: usize) -> Result<EncodedBatch, ModelError>;
}
