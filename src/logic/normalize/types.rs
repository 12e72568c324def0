use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::logic::error::NormalizeError;

/// Guard against a zero-width reference range
const MIN_RANGE: f64 = 1e-8;

/// Scaling policy. Fixed to min-max; eval applies the same affine map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationPolicy {
    MinMax,
}

/// Reference statistics computed once from the train split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub policy: NormalizationPolicy,
    pub min: f64,
    pub max: f64,
    pub sample_count: usize,
    pub created_at: i64,
    pub checksum: String,
}

impl NormalizationStats {
    /// Fit min-max stats on valid (finite) train losses
    pub fn fit(losses: &[f64]) -> Result<Self, NormalizeError> {
        let finite: Vec<f64> = losses.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return Err(NormalizeError::EmptyPopulation);
        }

        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let mut stats = Self {
            policy: NormalizationPolicy::MinMax,
            min,
            max,
            sample_count: finite.len(),
            created_at: chrono::Utc::now().timestamp(),
            checksum: String::new(),
        };
        stats.checksum = stats.compute_checksum();
        Ok(stats)
    }

    fn range(&self) -> f64 {
        (self.max - self.min).max(MIN_RANGE)
    }

    /// Affine map of one value. Not clamped: eval losses beyond the train
    /// range land outside [0, 1]. Non-finite inputs pass through unchanged.
    pub fn apply_one(&self, loss: f64) -> f64 {
        match self.policy {
            NormalizationPolicy::MinMax => (loss - self.min) / self.range(),
        }
    }

    pub fn apply(&self, losses: &[f64]) -> Vec<f64> {
        losses.iter().map(|&l| self.apply_one(l)).collect()
    }

    /// SHA-256 over the fields that drive the transform
    pub fn compute_checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{:?}", self.policy).as_bytes());
        hasher.update(self.min.to_le_bytes());
        hasher.update(self.max.to_le_bytes());
        hasher.update((self.sample_count as u64).to_le_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn verify(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}
