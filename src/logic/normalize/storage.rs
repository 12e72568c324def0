use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::NORMALIZATION_STATS_FILE;
use crate::logic::error::NormalizeError;
use super::types::NormalizationStats;

/// Stats file for a given stats directory
pub fn stats_file(stats_path: &Path) -> PathBuf {
    stats_path.join(NORMALIZATION_STATS_FILE)
}

/// Save stats to disk
pub fn save_stats(stats: &NormalizationStats, stats_path: &Path) -> Result<(), NormalizeError> {
    fs::create_dir_all(stats_path)?;

    let json = serde_json::to_vec_pretty(stats)?;
    fs::write(stats_file(stats_path), json)?;
    Ok(())
}

/// Load stats from disk with checksum verification
pub fn load_stats(stats_path: &Path) -> Result<NormalizationStats, NormalizeError> {
    let path = stats_file(stats_path);
    if !path.exists() {
        return Err(NormalizeError::MissingStats(path.display().to_string()));
    }

    let data = fs::read(&path)?;
    let stats: NormalizationStats = serde_json::from_slice(&data)?;

    if !stats.verify() {
        return Err(NormalizeError::ChecksumMismatch {
            path: path.display().to_string(),
        });
    }

    Ok(stats)
}
