//! # Errors
//!
//! Error taxonomy shared by every pipeline stage. Per-asset variants
//! (`DataUnavailable`, `InsufficientData`, `InsufficientOverlap`, `ModelFit`)
//! are recoverable under the skip-asset policy; `Optimization` never is.

use serde::Serialize;
use thiserror::Error;

use crate::quant::portfolio::types::SolverStatus;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Everything that can make a run fail.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PipelineError {
  #[error("no usable price series for {ticker}: {reason}")]
  DataUnavailable { ticker: String, reason: String },
  #[error("{ticker} has {observations} observations, at least {required} required")]
  InsufficientData {
    ticker: String,
    observations: usize,
    required: usize,
  },
  #[error("{first} and {second} share only {overlap} return observations, at least 2 required")]
  InsufficientOverlap {
    first: String,
    second: String,
    overlap: usize,
  },
  #[error("model fit failed for {ticker}: {reason}")]
  ModelFit { ticker: String, reason: String },
  #[error("optimization failed ({status}): {message}")]
  Optimization {
    status: SolverStatus,
    message: String,
  },
  #[error("every asset was excluded from the run")]
  EmptyUniverse,
  #[error("weights cover {found:?} but the run universe is {expected:?}")]
  UniverseMismatch {
    expected: Vec<String>,
    found: Vec<String>,
  },
  #[error("invalid configuration: {0}")]
  InvalidConfig(String),
  #[error("configuration parse error: {0}")]
  ConfigParse(String),
  #[error("io error: {0}")]
  Io(String),
  #[error("serialization error: {0}")]
  Serialization(String),
}

impl PipelineError {
  /// Stable name of the taxonomy kind, used in reports.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::DataUnavailable { .. } => "data_unavailable",
      Self::InsufficientData { .. } => "insufficient_data",
      Self::InsufficientOverlap { .. } => "insufficient_overlap",
      Self::ModelFit { .. } => "model_fit",
      Self::Optimization { .. } => "optimization",
      Self::EmptyUniverse => "empty_universe",
      Self::UniverseMismatch { .. } => "universe_mismatch",
      Self::InvalidConfig(_) => "invalid_config",
      Self::ConfigParse(_) => "config_parse",
      Self::Io(_) => "io",
      Self::Serialization(_) => "serialization",
    }
  }

  /// Assets the failure is attributed to, empty for run-level failures.
  pub fn failing_assets(&self) -> Vec<&str> {
    match self {
      Self::DataUnavailable { ticker, .. }
      | Self::InsufficientData { ticker, .. }
      | Self::ModelFit { ticker, .. } => vec![ticker.as_str()],
      Self::InsufficientOverlap { first, second, .. } => vec![first.as_str(), second.as_str()],
      _ => Vec::new(),
    }
  }

  /// Whether the skip-asset policy may drop the asset instead of aborting.
  pub fn is_per_asset(&self) -> bool {
    matches!(
      self,
      Self::DataUnavailable { .. }
        | Self::InsufficientData { .. }
        | Self::InsufficientOverlap { .. }
        | Self::ModelFit { .. }
    )
  }
}

impl From<std::io::Error> for PipelineError {
  fn from(err: std::io::Error) -> Self {
    Self::Io(err.to_string())
  }
}

impl From<serde_json::Error> for PipelineError {
  fn from(err: serde_json::Error) -> Self {
    Self::Serialization(err.to_string())
  }
}

impl From<toml::de::Error> for PipelineError {
  fn from(err: toml::de::Error) -> Self {
    Self::ConfigParse(err.to_string())
  }
}
