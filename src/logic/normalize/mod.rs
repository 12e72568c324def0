//! Normalizer - Loss scaling for cross-run comparability
//!
//! Maps raw reconstruction losses onto a comparable range using min-max
//! statistics fitted once on the train split.
//!
//! # Architecture
//! - `types.rs`: `NormalizationStats` value object (policy, min, max, checksum)
//! - `storage.rs`: Persistent storage keyed by stats path
//!
//! # Failure Strategy
//! Eval without persisted train stats is a configuration error. Stats are
//! never recomputed from an eval split.

pub mod types;
pub mod storage;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::logic::error::NormalizeError;

pub use types::{NormalizationPolicy, NormalizationStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizeMode {
    Train,
    Eval,
}

/// Fit stats on the train split, persist them and normalize the split
pub fn fit_and_persist(
    losses: &[f64],
    stats_path: &Path,
) -> Result<(NormalizationStats, Vec<f64>), NormalizeError> {
    let stats = NormalizationStats::fit(losses)?;
    storage::save_stats(&stats, stats_path)?;
    log::info!(
        "Normalization stats fitted on {} train losses (min={:.4}, max={:.4})",
        stats.sample_count, stats.min, stats.max
    );
    let normalized = stats.apply(losses);
    Ok((stats, normalized))
}

/// `normalize(losses, stats_path, mode)`
///
/// Train mode fits and persists reference stats; eval mode loads them and
/// applies the same affine map.
pub fn normalize(
    losses: &[f64],
    stats_path: &Path,
    mode: NormalizeMode,
) -> Result<Vec<f64>, NormalizeError> {
    match mode {
        NormalizeMode::Train => fit_and_persist(losses, stats_path).map(|(_, n)| n),
        NormalizeMode::Eval => {
            let stats = storage::load_stats(stats_path)?;
            Ok(stats.apply(losses))
        }
    }
}
