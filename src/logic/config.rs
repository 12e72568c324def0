//! Detector Configuration
//!
//! Loaded from a JSON file, then overridden from the environment
//! (`OODGUARD_*`, `.env` supported by the binary).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{
    default_artifacts_dir, env_flag, env_parse, DEFAULT_EVT_FPR, DEFAULT_FIXED_THRESHOLD,
    DEFAULT_MAX_LENGTH, DEFAULT_MIN_TAIL_SIZE, DEFAULT_TAIL_FRACTION, EVT_RESULTS_DIR,
    EVT_RESULTS_FILE,
};
use super::error::ConfigError;
use super::evt::EvtSettings;

// ============================================================================
// DETECTOR CONFIG
// ============================================================================

/// Per-class EVT variant used by the class-conditional path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvtVariant {
    Robust,
    Standard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Target false-positive rate for EVT thresholds
    pub evt_fpr: f64,
    /// Fraction of the dev distribution treated as tail
    pub tail_fraction: f64,
    /// Minimum tail examples needed to fit a tail model
    pub min_tail_size: usize,
    /// Decision boundary on normalized loss when EVT is off
    pub fixed_threshold: f64,
    /// EVT threshold on VAE losses (true) or fixed threshold (false)
    pub use_evt_vae: bool,
    pub evt_variant: EvtVariant,
    /// Per-class thresholds on ensemble scores instead of one loss threshold
    pub class_conditional: bool,
    pub max_length: usize,
    pub artifacts_dir: PathBuf,
    pub dataset: Option<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            evt_fpr: DEFAULT_EVT_FPR,
            tail_fraction: DEFAULT_TAIL_FRACTION,
            min_tail_size: DEFAULT_MIN_TAIL_SIZE,
            fixed_threshold: DEFAULT_FIXED_THRESHOLD,
            use_evt_vae: false,
            evt_variant: EvtVariant::Robust,
            class_conditional: false,
            max_length: DEFAULT_MAX_LENGTH,
            artifacts_dir: default_artifacts_dir(),
            dataset: None,
        }
    }
}

impl DetectorConfig {
    /// Read a JSON config file; missing keys take their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// File (if any) + environment overrides, validated
    pub fn from_sources(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("OODGUARD_EVT_FPR") {
            self.evt_fpr = v;
        }
        if let Some(v) = env_parse("OODGUARD_TAIL_FRACTION") {
            self.tail_fraction = v;
        }
        if let Some(v) = env_parse("OODGUARD_MIN_TAIL_SIZE") {
            self.min_tail_size = v;
        }
        if let Some(v) = env_parse("OODGUARD_FIXED_THRESHOLD") {
            self.fixed_threshold = v;
        }
        if let Some(v) = env_flag("OODGUARD_USE_EVT_VAE") {
            self.use_evt_vae = v;
        }
        if let Ok(dir) = std::env::var("OODGUARD_ARTIFACTS_DIR") {
            self.artifacts_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.evt_fpr > 0.0 && self.evt_fpr < 1.0) {
            return Err(ConfigError::Invalid {
                key: "evt_fpr",
                reason: format!("{} not in (0, 1)", self.evt_fpr),
            });
        }
        if !(self.tail_fraction > 0.0 && self.tail_fraction <= 1.0) {
            return Err(ConfigError::Invalid {
                key: "tail_fraction",
                reason: format!("{} not in (0, 1]", self.tail_fraction),
            });
        }
        if self.min_tail_size < 2 {
            return Err(ConfigError::Invalid {
                key: "min_tail_size",
                reason: "must be at least 2".to_string(),
            });
        }
        if !self.fixed_threshold.is_finite() {
            return Err(ConfigError::Invalid {
                key: "fixed_threshold",
                reason: "must be finite".to_string(),
            });
        }
        if self.max_length == 0 {
            return Err(ConfigError::Invalid {
                key: "max_length",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn evt_settings(&self) -> EvtSettings {
        EvtSettings {
            fpr: self.evt_fpr,
            tail_fraction: self.tail_fraction,
            min_tail_size: self.min_tail_size,
        }
    }

    /// Normalization stats live directly under the artifacts dir
    pub fn stats_path(&self) -> PathBuf {
        self.artifacts_dir.clone()
    }

    pub fn evt_results_path(&self) -> PathBuf {
        self.artifacts_dir.join(EVT_RESULTS_DIR).join(EVT_RESULTS_FILE)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DetectorConfig::default();
        assert_eq!(config.evt_fpr, 0.05);
        assert_eq!(config.tail_fraction, 0.2);
        assert_eq!(config.min_tail_size, 30);
        assert_eq!(config.fixed_threshold, 0.2);
        assert!(!config.use_evt_vae);
        assert_eq!(config.evt_variant, EvtVariant::Robust);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"use_evt_vae": true, "evt_fpr": 0.1, "evt_variant": "standard"}"#).unwrap();

        let config = DetectorConfig::load(&path).unwrap();
        assert!(config.use_evt_vae);
        assert_eq!(config.evt_fpr, 0.1);
        assert_eq!(config.evt_variant, EvtVariant::Standard);
        assert_eq!(config.min_tail_size, 30);
    }

    #[test]
    fn test_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{").unwrap();
        assert!(matches!(DetectorConfig::load(&path), Err(ConfigError::Parse(_))));
        assert!(matches!(
            DetectorConfig::load(&dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            DetectorConfig { evt_fpr: 0.0, ..Default::default() },
            DetectorConfig { evt_fpr: 1.0, ..Default::default() },
            DetectorConfig { tail_fraction: 1.5, ..Default::default() },
            DetectorConfig { min_tail_size: 1, ..Default::default() },
            DetectorConfig { fixed_threshold: f64::NAN, ..Default::default() },
            DetectorConfig { max_length: 0, ..Default::default() },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{:?}", config);
        }
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("OODGUARD_TAIL_FRACTION", "0.3");
        std::env::set_var("OODGUARD_USE_EVT_VAE", "1");

        let mut config = DetectorConfig::default();
        config.apply_env_overrides();

        std::env::remove_var("OODGUARD_TAIL_FRACTION");
        std::env::remove_var("OODGUARD_USE_EVT_VAE");

        assert_eq!(config.tail_fraction, 0.3);
        assert!(config.use_evt_vae);
    }

    #[test]
    fn test_paths_and_settings() {
        let config = DetectorConfig {
            artifacts_dir: PathBuf::from("/tmp/art"),
            ..Default::default()
        };
        assert_eq!(config.evt_results_path(), PathBuf::from("/tmp/art/evt/evt_results.json"));
        assert_eq!(config.evt_settings().min_tail_size, 30);
    }
}
