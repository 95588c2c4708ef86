//! Shared inference engine and the per-session throttle / snapshot
//!
//! The engine is loaded once and shared read-only between sessions. Each
//! session keeps its own throttle and last-known-good snapshot.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{HistoryConfig, ModelConfig};
use crate::features::FeatureVector;
use crate::models::{
    ArtifactPaths, ClassifierAdapter, ClassifierResult, Diagnostics, Forecast, ForecastAdapter,
    ModelError,
};

/// Classifier + forecasters for all sessions
pub struct InferenceEngine {
    paths: ArtifactPaths,
    horizons: Vec<u32>,
    classifier: ClassifierAdapter,
    forecaster: ForecastAdapter,
}

/// One successful inference
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutput {
    pub classification: ClassifierResult,
    pub forecast: Forecast,
}

impl InferenceEngine {
    /// Load every artifact found under the configured directory. Never fails:
    /// an unresolvable directory yields a degraded engine.
    pub fn load(config: &ModelConfig) -> Self {
        let dir = match config.resolve_model_dir() {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Cannot resolve model directory, running degraded: {}", e);
                return Self::degraded();
            }
        };
        let paths = ArtifactPaths::new(dir, &config.model_name);
        let classifier = ClassifierAdapter::load(&paths, config.n_threads);
        let forecaster = ForecastAdapter::load(&paths, &config.forecast_horizons);
        Self::from_parts(paths, config.forecast_horizons.clone(), classifier, forecaster)
    }

    pub fn from_parts(
        paths: ArtifactPaths,
        horizons: Vec<u32>,
        classifier: ClassifierAdapter,
        forecaster: ForecastAdapter,
    ) -> Self {
        Self {
            paths,
            horizons,
            classifier,
            forecaster,
        }
    }

    /// No artifacts at all
    pub fn degraded() -> Self {
        let defaults = ModelConfig::default();
        Self::from_parts(
            ArtifactPaths::new(std::path::PathBuf::new(), &defaults.model_name),
            defaults.forecast_horizons,
            ClassifierAdapter::degraded(),
            ForecastAdapter::empty(),
        )
    }

    pub fn classifier(&self) -> &ClassifierAdapter {
        &self.classifier
    }

    pub fn forecaster(&self) -> &ForecastAdapter {
        &self.forecaster
    }

    /// Feature-window length: the configured context, widened to the longest
    /// training window of any loaded forecaster
    pub fn context_ms(&self, history: &HistoryConfig) -> u64 {
        let sec = self
            .forecaster
            .max_window_sec()
            .map_or(history.context_window_sec, |w| w.max(history.context_window_sec));
        sec.saturating_mul(1000)
    }

    pub fn run(&self, features: &FeatureVector) -> Result<InferenceOutput, ModelError> {
        let classification = self.classifier.classify(features)?;
        let forecast = self.forecaster.forecast(features);
        Ok(InferenceOutput {
            classification,
            forecast,
        })
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics::collect(&self.paths, &self.classifier, &self.forecaster, &self.horizons)
    }
}

/// Caps inference frequency in simulated time
#[derive(Debug, Clone)]
pub struct InferenceThrottle {
    interval_ms: u64,
    last_ms: Option<u64>,
}

impl InferenceThrottle {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_ms: None,
        }
    }

    pub fn is_due(&self, t_ms: u64) -> bool {
        match self.last_ms {
            None => self.interval_ms != u64::MAX,
            Some(last) => t_ms.saturating_sub(last) >= self.interval_ms,
        }
    }

    pub fn mark(&mut self, t_ms: u64) {
        self.last_ms = Some(t_ms);
    }

    pub fn last_ms(&self) -> Option<u64> {
        self.last_ms
    }
}

/// Error from one inference attempt, carried next to the last good result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceFailure {
    pub message: String,
    pub at_ms: u64,
}

/// Most recent inference state attached to every record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceSnapshot {
    pub classification: Option<ClassifierResult>,
    pub forecast: Forecast,
    pub recommendations: Vec<String>,
    /// Simulated time of the last successful inference
    pub inferred_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<InferenceFailure>,
}
