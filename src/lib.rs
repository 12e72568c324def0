//! OOD Guard Core - Anomaly Scoring & Threshold Decision Engine
//!
//! Detects out-of-domain utterances for an intent classifier by combining a
//! reconstruction model's loss with the classifier's confidence, and calibrates
//! the reject threshold on held-out data with extreme-value statistics.

pub mod constants;
pub mod logic;

pub use logic::error::EngineError;
