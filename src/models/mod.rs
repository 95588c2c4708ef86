//! Pre-trained model adapters.
//!
//! The classifier and forecasters are opaque artifacts loaded once at startup:
//! - Optimized classifier: ONNX graph (`{name}.int8.onnx`, else `{name}.onnx`)
//! - Reference classifier: standardized softmax model (`{name}.json`)
//! - Forecasters: per-horizon bundles of per-label logistic models
//!   (`forecast_model_{h}.json`)
//!
//! Loading never fails hard. Missing or broken artifacts leave the adapter in a
//! degraded state that still returns well-formed results.

mod artifacts;
mod classifier;
mod forecast;
mod linear;
mod onnx;

use std::path::PathBuf;
use thiserror::Error;

pub use artifacts::{file_status, ArtifactPaths, Diagnostics, FileStatus, ModelSource};
pub use classifier::{
    BackendKind, ClassProbabilities, ClassifierAdapter, ClassifierBackend, ClassifierResult,
    DegradedClassifier, FetalHealth, ReferenceClassifier,
};
pub use forecast::{Forecast, ForecastAdapter, ForecastArtifact, ForecastLabel, Horizon};
pub use linear::{LogisticModel, SoftmaxModel};
pub use onnx::OnnxClassifier;

/// Errors that can occur while loading or running a model
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model artifact not found: {0:?}")]
    ArtifactMissing(PathBuf),

    #[error("Failed to load model {path:?}: {reason}")]
    ArtifactLoad { path: PathBuf, reason: String },

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Feature not enabled: {0}")]
    FeatureNotEnabled(&'static str),

    #[error("Invalid model output: {0}")]
    InvalidOutput(String),
}
