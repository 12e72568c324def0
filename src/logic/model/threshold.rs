//! Threshold Table & Calibration Artifact
//!
//! Quản lý ngưỡng quyết định OOD theo class hoặc global.
//! Mỗi ngưỡng đi kèm model đã fit: GEV được chấp nhận, hoặc percentile fallback
//! với lý do rõ ràng.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{EVT_RESULTS_DIR, EVT_RESULTS_FILE};
use crate::logic::error::ArtifactError;

// ============================================================================
// KEYS
// ============================================================================

/// Class id, or the single class-agnostic key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ThresholdKey {
    Global,
    Class(u32),
}

impl fmt::Display for ThresholdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdKey::Global => write!(f, "global"),
            ThresholdKey::Class(id) => write!(f, "{}", id),
        }
    }
}

impl From<ThresholdKey> for String {
    fn from(key: ThresholdKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for ThresholdKey {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s == "global" {
            return Ok(ThresholdKey::Global);
        }
        s.parse::<u32>()
            .map(ThresholdKey::Class)
            .map_err(|_| format!("invalid threshold key '{}'", s))
    }
}

// ============================================================================
// FITTED MODELS
// ============================================================================

/// Why a percentile threshold was used instead of a GEV one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Fewer raw scores than the GEV minimum
    InsufficientSamples { count: usize },
    /// Too few scores survived outlier trimming
    TooFewAfterTrim { count: usize },
    /// Solver raised
    FitFailed { message: String },
    /// Parameters outside |shape| <= 2, 0 < scale <= 10
    ParamsOutOfBounds { shape: f64, loc: f64, scale: f64 },
    /// GEV threshold outside the observed score range
    ThresholdOutOfRange { rejected: f64 },
    /// Target FPR is not inside the modelled tail
    FprOutsideTail { fpr: f64, tail_fraction: f64 },
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::InsufficientSamples { count } => write!(f, "only {} samples", count),
            FallbackReason::TooFewAfterTrim { count } => {
                write!(f, "only {} samples after outlier removal", count)
            }
            FallbackReason::FitFailed { message } => write!(f, "fit failed: {}", message),
            FallbackReason::ParamsOutOfBounds { shape, loc, scale } => write!(
                f,
                "unreasonable parameters (shape={:.4}, loc={:.4}, scale={:.4})",
                shape, loc, scale
            ),
            FallbackReason::ThresholdOutOfRange { rejected } => {
                write!(f, "threshold {:.4} out of observed range", rejected)
            }
            FallbackReason::FprOutsideTail { fpr, tail_fraction } => {
                write!(f, "fpr {} not inside tail fraction {}", fpr, tail_fraction)
            }
        }
    }
}

/// Model behind a threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FittedModel {
    Gev { shape: f64, loc: f64, scale: f64 },
    Percentile { value: f64, percentile: f64, reason: FallbackReason },
}

impl FittedModel {
    pub fn is_gev(&self) -> bool {
        matches!(self, FittedModel::Gev { .. })
    }
}

// ============================================================================
// TABLE
// ============================================================================

/// Per-key thresholds and their models. Serialized as the calibration
/// artifact: exactly two top-level keys, `thresholds` and `models`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTable {
    pub thresholds: BTreeMap<ThresholdKey, f64>,
    pub models: BTreeMap<ThresholdKey, FittedModel>,
}

impl ThresholdTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: ThresholdKey, threshold: f64, model: FittedModel) {
        self.thresholds.insert(key, threshold);
        self.models.insert(key, model);
    }

    pub fn get(&self, key: ThresholdKey) -> Option<f64> {
        self.thresholds.get(&key).copied()
    }

    /// Threshold for a class, falling back to the global entry
    pub fn threshold_for(&self, class: u32) -> Option<f64> {
        self.get(ThresholdKey::Class(class))
            .or_else(|| self.get(ThresholdKey::Global))
    }

    /// Accepted GEV models only
    pub fn gev_models(&self) -> impl Iterator<Item = (&ThresholdKey, &FittedModel)> {
        self.models.iter().filter(|(_, m)| m.is_gev())
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }
}

// ============================================================================
// STORAGE
// ============================================================================

/// Save calibration artifact to disk
pub fn save_table(table: &ThresholdTable, path: &Path) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_vec_pretty(table)?;
    fs::write(path, json)?;
    Ok(())
}

/// Save under `<artifacts_dir>/evt/evt_results.json`, returning the path
pub fn save_table_at(table: &ThresholdTable, artifacts_dir: &Path) -> Result<PathBuf, ArtifactError> {
    let path = artifacts_dir.join(EVT_RESULTS_DIR).join(EVT_RESULTS_FILE);
    save_table(table, &path)?;
    log::info!("Saved {} thresholds to {}", table.len(), path.display());
    Ok(path)
}

/// Load calibration artifact from disk
pub fn load_table(path: &Path) -> Result<ThresholdTable, ArtifactError> {
    if !path.exists() {
        return Err(ArtifactError::NotFound(path.display().to_string()));
    }

    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}
