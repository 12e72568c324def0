//! Error taxonomy
//!
//! Recoverable conditions (invalid scores, empty populations, fit failures,
//! insufficient samples) are logged and never reach these types. What is left
//! here is either a collaborator failure that the caller turns into a skip, or
//! a genuine configuration/state problem that aborts the run.

use thiserror::Error;

use super::evt::FitError;

pub type EngineResult<T> = Result<T, EngineError>;

/// Failure raised by an external model collaborator (scorer, classifier, tokenizer)
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model not loaded: {0}")]
    NotLoaded(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("tensor error: {0}")]
    Tensor(String),

    #[error("preprocessing failed: {0}")]
    Preprocess(String),

    #[error("replay exhausted after {0} calls")]
    ReplayExhausted(usize),
}

/// Normalizer failures
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// ConfigurationError: eval requested before train-mode stats exist
    #[error("configuration error: no normalization stats at {0} (run train mode first)")]
    MissingStats(String),

    #[error("cannot compute normalization stats from an empty population")]
    EmptyPopulation,

    #[error("normalization stats at {path} failed checksum verification")]
    ChecksumMismatch { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Ensemble score inputs must be finite
#[derive(Debug, Error, PartialEq)]
pub enum ScoreError {
    #[error("invalid score at index {index}: max_prob={max_prob}, loss={loss}")]
    InvalidScore { index: usize, max_prob: f64, loss: f64 },

    #[error("length mismatch: {probs} probabilities vs {losses} losses")]
    LengthMismatch { probs: usize, losses: usize },
}

/// EVT fitting failures that escape the fitter (standard variant only)
#[derive(Debug, Error)]
pub enum EvtError {
    #[error("GEV fit failed for {key}: {source}")]
    FitFailure { key: String, source: FitError },

    #[error("no scores to fit")]
    NoScores,
}

/// Calibration artifact persistence
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration errors (fatal)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Dataset record loading
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("split file not found: {0}")]
    MissingSplit(String),

    #[error("{file}:{line}: {source}")]
    BadRecord {
        file: String,
        line: usize,
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Umbrella error for the pipeline surface
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Score(#[from] ScoreError),

    #[error(transparent)]
    Evt(#[from] EvtError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("input length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
}
