//! Fixed-horizon pathology forecasters

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::artifacts::ArtifactPaths;
use super::linear::{load_json, LogisticModel};
use super::ModelError;
use crate::features::FeatureVector;

/// Binary outcome predicted at each horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastLabel {
    FetalBradycardia,
    FetalTachycardia,
    LowVariability,
    UterineTachysystole,
    AnyPathology,
}

impl ForecastLabel {
    pub const ALL: [ForecastLabel; 5] = [
        ForecastLabel::FetalBradycardia,
        ForecastLabel::FetalTachycardia,
        ForecastLabel::LowVariability,
        ForecastLabel::UterineTachysystole,
        ForecastLabel::AnyPathology,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastLabel::FetalBradycardia => "fetal_bradycardia",
            ForecastLabel::FetalTachycardia => "fetal_tachycardia",
            ForecastLabel::LowVariability => "low_variability",
            ForecastLabel::UterineTachysystole => "uterine_tachysystole",
            ForecastLabel::AnyPathology => "any_pathology",
        }
    }
}

impl FromStr for ForecastLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|l| l.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown forecast label: {}", s))
    }
}

/// Forecast horizon in minutes, keyed as `"{h}min"` on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Horizon(pub u32);

impl Horizon {
    pub fn minutes(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}min", self.0)
    }
}

impl From<Horizon> for String {
    fn from(h: Horizon) -> Self {
        h.to_string()
    }
}

impl TryFrom<String> for Horizon {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value
            .strip_suffix("min")
            .and_then(|n| n.parse().ok())
            .map(Horizon)
            .ok_or_else(|| format!("invalid horizon: {}", value))
    }
}

/// Per-horizon, per-label probabilities
pub type Forecast = BTreeMap<Horizon, BTreeMap<ForecastLabel, f64>>;

/// On-disk bundle for one horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastArtifact {
    #[serde(default)]
    pub version: String,
    /// Context length the models were trained on; 0 when unknown
    #[serde(default)]
    pub window_sec: u64,
    /// Label order; empty means every entry of `models`
    #[serde(default)]
    pub labels: Vec<String>,
    pub models: BTreeMap<String, LogisticModel>,
}

#[derive(Debug, Clone)]
struct HorizonModels {
    window_sec: u64,
    models: Vec<(ForecastLabel, LogisticModel)>,
}

impl HorizonModels {
    fn from_artifact(artifact: ForecastArtifact) -> Result<Self, String> {
        let names: Vec<String> = if artifact.labels.is_empty() {
            artifact.models.keys().cloned().collect()
        } else {
            artifact.labels.clone()
        };

        let mut models = Vec::new();
        for name in names {
            let label = match name.parse::<ForecastLabel>() {
                Ok(l) => l,
                Err(e) => {
                    warn!("Skipping forecaster: {}", e);
                    continue;
                }
            };
            let Some(model) = artifact.models.get(&name) else {
                warn!("Forecast label {} listed without a model", name);
                continue;
            };
            model
                .validate(FeatureVector::LEN)
                .map_err(|e| format!("{}: {}", name, e))?;
            models.push((label, model.clone()));
        }

        if models.is_empty() {
            return Err("no usable label models".to_string());
        }
        Ok(Self {
            window_sec: artifact.window_sec,
            models,
        })
    }
}

/// Runs every loaded (horizon, label) model independently
#[derive(Debug, Clone, Default)]
pub struct ForecastAdapter {
    horizons: BTreeMap<Horizon, HorizonModels>,
}

impl ForecastAdapter {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load `forecast_model_{h}.json` for each horizon; missing files are skipped
    pub fn load(paths: &ArtifactPaths, horizons: &[u32]) -> Self {
        let mut adapter = Self::empty();
        for &h in horizons {
            let path = paths.forecast(h);
            match load_json::<ForecastArtifact>(&path) {
                Ok(artifact) => {
                    if let Err(e) = adapter.insert(h, artifact) {
                        warn!("Failed to load {}min forecaster {:?}: {}", h, path, e);
                    } else {
                        info!("Forecast model {}min loaded from {:?}", h, path);
                    }
                }
                Err(ModelError::ArtifactMissing(_)) => {
                    debug!("Forecast model {}min not found, horizon disabled", h);
                }
                Err(e) => warn!("Failed to load {}min forecaster: {}", h, e),
            }
        }
        adapter
    }

    /// Register an in-memory artifact for a horizon
    pub fn insert(&mut self, horizon_min: u32, artifact: ForecastArtifact) -> Result<(), ModelError> {
        let models = HorizonModels::from_artifact(artifact).map_err(|reason| ModelError::ArtifactLoad {
            path: format!("forecast_model_{}", horizon_min).into(),
            reason,
        })?;
        self.horizons.insert(Horizon(horizon_min), models);
        Ok(())
    }

    pub fn loaded_horizons(&self) -> Vec<u32> {
        self.horizons.keys().map(|h| h.0).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.horizons.is_empty()
    }

    /// Longest training context among loaded artifacts, in seconds
    pub fn max_window_sec(&self) -> Option<u64> {
        self.horizons
            .values()
            .map(|h| h.window_sec)
            .filter(|w| *w > 0)
            .max()
    }

    /// Evaluate every loaded model. A failing label is dropped on its own.
    pub fn forecast(&self, features: &FeatureVector) -> Forecast {
        let x = features.to_array();
        let mut out = Forecast::new();
        for (horizon, bundle) in &self.horizons {
            let mut labels = BTreeMap::new();
            for (label, model) in &bundle.models {
                match model.predict_proba(&x) {
                    Ok(p) => {
                        labels.insert(*label, p);
                    }
                    Err(e) => debug!("Forecast {} {} failed: {}", horizon, label.as_str(), e),
                }
            }
            out.insert(*horizon, labels);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_model(intercept: f64) -> LogisticModel {
        LogisticModel {
            means: vec![],
            scales: vec![],
            coefficients: vec![0.0; FeatureVector::LEN],
            intercept,
        }
    }

    fn artifact(window_sec: u64) -> ForecastArtifact {
        let mut models = BTreeMap::new();
        models.insert("fetal_bradycardia".to_string(), flat_model(0.0));
        models.insert("any_pathology".to_string(), flat_model(2.0));
        ForecastArtifact {
            version: "1".to_string(),
            window_sec,
            labels: vec!["fetal_bradycardia".into(), "any_pathology".into()],
            models,
        }
    }

    #[test]
    fn test_horizon_wire_format() {
        assert_eq!(Horizon(10).to_string(), "10min");
        assert_eq!(Horizon::try_from("60min".to_string()), Ok(Horizon(60)));
        assert!(Horizon::try_from("60".to_string()).is_err());
    }

    #[test]
    fn test_label_names() {
        for label in ForecastLabel::ALL {
            assert_eq!(label.as_str().parse::<ForecastLabel>(), Ok(label));
            let json = serde_json::to_string(&label).unwrap();
            assert_eq!(json, format!("\"{}\"", label.as_str()));
        }
    }

    #[test]
    fn test_empty_adapter_forecasts_nothing() {
        let adapter = ForecastAdapter::empty();
        assert!(adapter.forecast(&FeatureVector::default()).is_empty());
        assert!(adapter.max_window_sec().is_none());
    }

    #[test]
    fn test_forecast_shape() {
        let mut adapter = ForecastAdapter::empty();
        adapter.insert(10, artifact(300)).unwrap();
        adapter.insert(30, artifact(600)).unwrap();

        let forecast = adapter.forecast(&FeatureVector::default());
        assert_eq!(forecast.len(), 2);
        let ten = &forecast[&Horizon(10)];
        assert!((ten[&ForecastLabel::FetalBradycardia] - 0.5).abs() < 1e-12);
        assert!(ten[&ForecastLabel::AnyPathology] > 0.85);
        assert_eq!(adapter.loaded_horizons(), vec![10, 30]);
        assert_eq!(adapter.max_window_sec(), Some(600));

        let json = serde_json::to_value(&forecast).unwrap();
        assert!(json["30min"]["any_pathology"].is_number());
    }

    #[test]
    fn test_unknown_labels_skipped() {
        let mut a = artifact(300);
        a.labels.push("hypoxia".into());
        a.models.insert("hypoxia".into(), flat_model(0.0));
        let mut adapter = ForecastAdapter::empty();
        adapter.insert(10, a).unwrap();
        assert_eq!(adapter.forecast(&FeatureVector::default())[&Horizon(10)].len(), 2);
    }

    #[test]
    fn test_bad_shape_rejected() {
        let mut a = artifact(300);
        a.models.insert("fetal_bradycardia".into(), LogisticModel {
            coefficients: vec![1.0; 3],
            ..flat_model(0.0)
        });
        let mut adapter = ForecastAdapter::empty();
        assert!(adapter.insert(10, a).is_err());
        assert!(adapter.is_empty());
    }

    #[test]
    fn test_missing_horizon_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::new(dir.path(), "best_fetal_model");
        std::fs::write(paths.forecast(30), serde_json::to_string(&artifact(300)).unwrap()).unwrap();
        std::fs::write(paths.forecast(60), "garbage").unwrap();

        let adapter = ForecastAdapter::load(&paths, &[10, 30, 60]);
        assert_eq!(adapter.loaded_horizons(), vec![30]);
        let forecast = adapter.forecast(&FeatureVector::default());
        assert!(forecast.contains_key(&Horizon(30)));
        assert!(!forecast.contains_key(&Horizon(10)));
    }
}
