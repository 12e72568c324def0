//! EVT Fitter - Extreme-value thresholds
//!
//! Fits Generalized Extreme Value distributions to score populations and
//! derives a reject threshold at a target false-positive rate.
//!
//! # Architecture
//! - `gev.rs`: distribution (cdf/ppf/likelihood) and maximum-likelihood fit
//! - `stats.rs`: percentiles, IQR fences, moments
//! - `fitter.rs`: standard, robust and global fitters
//!
//! # Failure Strategy
//! Every GEV fit is validated (solver success, parameter bounds, threshold
//! inside the observed range). Anything that fails falls back to a
//! percentile threshold recorded as a first-class `FittedModel::Percentile`.

pub mod gev;
pub mod stats;
pub mod fitter;
#[cfg(test)]
mod tests;

pub use fitter::{
    evt_on_losses, fit_class_robust, fit_global, fit_robust, fit_standard, ClassFit,
    EvtSettings, GlobalEvtResult,
};
pub use gev::{FitError, GevParams};
