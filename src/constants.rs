//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! To change a default decision parameter, only edit this file.

/// Default target false-positive rate for EVT thresholds
pub const DEFAULT_EVT_FPR: f64 = 0.05;

/// Default fraction of the dev score distribution treated as tail
pub const DEFAULT_TAIL_FRACTION: f64 = 0.2;

/// Default minimum number of tail examples required to fit a tail model
pub const DEFAULT_MIN_TAIL_SIZE: usize = 30;

/// Default non-EVT decision boundary on normalized loss
pub const DEFAULT_FIXED_THRESHOLD: f64 = 0.2;

/// Default tokenizer sequence length
pub const DEFAULT_MAX_LENGTH: usize = 64;

/// Ensemble weight on classifier uncertainty (1 - max softmax prob).
/// Fixed: no configuration key tunes it.
pub const ENSEMBLE_ALPHA: f64 = 0.5;

/// Loss substituted when every example of a split is invalid
pub const SENTINEL_HIGH_LOSS: f64 = 10.0;

/// Classes with fewer validation scores skip GEV fitting
pub const MIN_CLASS_SAMPLES: usize = 10;

/// Minimum scores that must survive IQR trimming
pub const MIN_TRIMMED_SAMPLES: usize = 5;

/// Percentile used for tiny or over-trimmed classes
pub const SMALL_CLASS_PERCENTILE: f64 = 95.0;

/// IQR multiplier for outlier bounds
pub const IQR_MULTIPLIER: f64 = 1.5;

/// GEV sanity bounds
pub const MAX_ABS_SHAPE: f64 = 2.0;
pub const MAX_SCALE: f64 = 10.0;

/// File names inside the artifacts directory
pub const NORMALIZATION_STATS_FILE: &str = "normalization_stats.json";
pub const EVT_RESULTS_DIR: &str = "evt";
pub const EVT_RESULTS_FILE: &str = "evt_results.json";

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "OOD-Guard";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Read a parseable value from the environment, if set and valid
pub fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Read a boolean flag from the environment ("1"/"true" vs "0"/"false")
pub fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|s| {
        let s = s.trim().to_lowercase();
        s != "false" && s != "0"
    })
}

/// Default artifacts root (per-user data dir)
pub fn default_artifacts_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("oodguard")
        .join("artifacts")
}
