//! Logic Module - Scoring & Decision Engines
//!
//! Chứa các engines xử lý theo data flow:
//! Collector -> Normalizer -> Ensemble -> EVT Fitter -> Decision -> Metrics.
//!
//! - `model/` - Collaborators (ONNX, replay) và threshold artifacts
//! - `dataset/` - JSONL split records

// Core engines
pub mod collector;
pub mod normalize;
pub mod ensemble;
pub mod evt;
pub mod decision;
pub mod metrics;

// Plumbing
pub mod model;
pub mod dataset;
pub mod config;
pub mod error;
pub mod pipeline;
