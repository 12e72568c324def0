//! Inference Engine - ONNX Runtime Integration
//!
//! Load và chạy ONNX models (VAE scorer, intent classifier).
//! Scorer graph phải xuất loss scalar qua output `loss_output`.

use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Value;
use serde::{Deserialize, Serialize};

use crate::logic::collector::{EncodedBatch, ForwardOutput, ScoringModel};
use crate::logic::error::ModelError;
use super::Classifier;

/// Default name of the loss output in exported scorer graphs
pub const DEFAULT_LOSS_OUTPUT: &str = "loss";

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Model metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_path: String,
    pub model_kind: String,       // "scorer" hoặc "classifier"
    pub outputs: Vec<String>,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

// ============================================================================
// LOADING
// ============================================================================

/// Load ONNX session từ file
fn load_session(model_path: &str, kind: &str) -> Result<(Session, ModelMetadata), ModelError> {
    log::info!("Loading ONNX {} from: {}", kind, model_path);

    if !std::path::Path::new(model_path).exists() {
        return Err(ModelError::NotLoaded(format!("Model not found: {}", model_path)));
    }

    let session = Session::builder()
        .map_err(|e| ModelError::NotLoaded(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| ModelError::NotLoaded(format!("Failed to set optimization: {}", e)))?
        .commit_from_file(model_path)
        .map_err(|e| ModelError::NotLoaded(format!("Failed to load model: {}", e)))?;

    let metadata = ModelMetadata {
        model_path: model_path.to_string(),
        model_kind: kind.to_string(),
        outputs: session.outputs.iter().map(|o| o.name.clone()).collect(),
        loaded_at: chrono::Utc::now(),
    };

    log::info!("ONNX {} loaded ({} outputs)", kind, metadata.outputs.len());
    Ok((session, metadata))
}

/// Run a session on the three aligned input tensors, returning every
/// output flattened to f32, in `names` order
fn run_session(
    session: &mut Session,
    batch: &EncodedBatch,
    names: &[String],
) -> Result<Vec<Vec<f32>>, ModelError> {
    let ids = Value::from_array(batch.input_ids.clone())
        .map_err(|e| ModelError::Tensor(format!("input_ids: {}", e)))?;
    let mask = Value::from_array(batch.attention_mask.clone())
        .map_err(|e| ModelError::Tensor(format!("attention_mask: {}", e)))?;
    let types = Value::from_array(batch.token_type_ids.clone())
        .map_err(|e| ModelError::Tensor(format!("token_type_ids: {}", e)))?;

    let outputs = session
        .run(ort::inputs![
            "input_ids" => ids,
            "attention_mask" => mask,
            "token_type_ids" => types
        ])
        .map_err(|e| ModelError::Inference(format!("Inference failed: {}", e)))?;

    names
        .iter()
        .map(|name| {
            let output = outputs
                .get(name)
                .ok_or_else(|| ModelError::Inference(format!("No output '{}'", name)))?;
            let tensor = output
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::Tensor(format!("Extract error: {}", e)))?;
            Ok(tensor.1.to_vec())
        })
        .collect()
}

// ============================================================================
// SCORER
// ============================================================================

/// VAE reconstruction scorer backed by ONNX Runtime.
/// An exported inference graph carries no dropout or optimizer state, so
/// `eval_mode` only flags the session.
pub struct OnnxScorer {
    session: Session,
    metadata: ModelMetadata,
    loss_output: String,
    output_name: Option<String>,
    inference: bool,
}

impl OnnxScorer {
    pub fn load(model_path: &str, loss_output: &str) -> Result<Self, ModelError> {
        let (session, metadata) = load_session(model_path, "scorer")?;

        if !metadata.outputs.iter().any(|o| o == loss_output) {
            return Err(ModelError::NotLoaded(format!(
                "scorer graph has no '{}' output (outputs: {:?})",
                loss_output, metadata.outputs
            )));
        }
        let output_name = metadata.outputs.iter().find(|o| *o != loss_output).cloned();

        Ok(Self {
            session,
            metadata,
            loss_output: loss_output.to_string(),
            output_name,
            inference: false,
        })
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}

impl ScoringModel for OnnxScorer {
    fn eval_mode(&mut self) {
        self.inference = true;
    }

    fn forward(&mut self, batch: &EncodedBatch) -> Result<ForwardOutput, ModelError> {
        if !self.inference {
            return Err(ModelError::Inference("scorer not in inference mode".to_string()));
        }

        let mut names = vec![self.loss_output.clone()];
        names.extend(self.output_name.iter().cloned());

        let mut values = run_session(&mut self.session, batch, &names)?.into_iter();
        let registered_losses = values
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(f64::from)
            .collect();
        let output = values.next().unwrap_or_default();

        Ok(ForwardOutput { output, registered_losses })
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

/// Intent classifier backed by ONNX Runtime (first output = logits)
pub struct OnnxClassifier {
    session: Session,
    metadata: ModelMetadata,
    logits_output: String,
}

impl OnnxClassifier {
    pub fn load(model_path: &str) -> Result<Self, ModelError> {
        let (session, metadata) = load_session(model_path, "classifier")?;
        let logits_output = metadata
            .outputs
            .first()
            .cloned()
            .ok_or_else(|| ModelError::NotLoaded("No output defined".to_string()))?;

        Ok(Self { session, metadata, logits_output })
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&mut self, inputs: &EncodedBatch) -> Result<Vec<f32>, ModelError> {
        let names = [self.logits_output.clone()];
        let logits = run_session(&mut self.session, inputs, &names)?
            .into_iter()
            .next()
            .unwrap_or_default();

        // First row only
        let per_row = logits.len() / inputs.batch_size().max(1);
        Ok(logits.into_iter().take(per_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_file() {
        let result = OnnxScorer::load("/nonexistent/vae.onnx", DEFAULT_LOSS_OUTPUT);
        assert!(matches!(result, Err(ModelError::NotLoaded(_))));

        let result = OnnxClassifier::load("/nonexistent/bert.onnx");
        assert!(matches!(result, Err(ModelError::NotLoaded(_))));
    }
}
