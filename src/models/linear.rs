//! Standardized linear models stored as JSON

use ndarray::{Array1, Array2, ArrayView1};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::ModelError;

/// Binary logistic regression on standardized inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    /// Per-feature means; empty means no centering
    #[serde(default)]
    pub means: Vec<f64>,
    /// Per-feature scales; empty means no scaling
    #[serde(default)]
    pub scales: Vec<f64>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LogisticModel {
    pub fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        check_len("coefficients", self.coefficients.len(), n_features)?;
        check_optional_len("means", self.means.len(), n_features)?;
        check_optional_len("scales", self.scales.len(), n_features)
    }

    /// Probability of the positive class
    pub fn predict_proba(&self, x: &[f64]) -> Result<f64, ModelError> {
        if x.len() != self.coefficients.len() {
            return Err(ModelError::Inference(format!(
                "expected {} features, got {}",
                self.coefficients.len(),
                x.len()
            )));
        }
        let z = standardize(x, &self.means, &self.scales);
        let w = ArrayView1::from(&self.coefficients[..]);
        let p = sigmoid(w.dot(&z) + self.intercept);
        if p.is_finite() {
            Ok(p)
        } else {
            Err(ModelError::InvalidOutput(format!("non-finite probability {}", p)))
        }
    }
}

/// Multinomial logistic regression on standardized inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxModel {
    #[serde(default)]
    pub version: String,
    /// Class names in output order
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub means: Vec<f64>,
    #[serde(default)]
    pub scales: Vec<f64>,
    /// One row per class
    pub coefficients: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
}

impl SoftmaxModel {
    pub fn n_classes(&self) -> usize {
        self.intercepts.len()
    }

    pub fn validate(&self, n_features: usize, n_classes: usize) -> Result<(), String> {
        check_len("intercepts", self.intercepts.len(), n_classes)?;
        check_len("coefficient rows", self.coefficients.len(), n_classes)?;
        for row in &self.coefficients {
            check_len("coefficient columns", row.len(), n_features)?;
        }
        check_optional_len("means", self.means.len(), n_features)?;
        check_optional_len("scales", self.scales.len(), n_features)?;
        if !self.classes.is_empty() {
            check_len("classes", self.classes.len(), n_classes)?;
        }
        Ok(())
    }

    fn weights(&self) -> Result<Array2<f64>, ModelError> {
        let rows = self.coefficients.len();
        let cols = self.coefficients.first().map(|r| r.len()).unwrap_or(0);
        let flat: Vec<f64> = self.coefficients.iter().flatten().copied().collect();
        Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| ModelError::Inference(format!("bad coefficient matrix: {}", e)))
    }

    /// Class probabilities in `classes` order
    pub fn predict_proba(&self, x: &[f64]) -> Result<Vec<f64>, ModelError> {
        let w = self.weights()?;
        if w.ncols() != x.len() {
            return Err(ModelError::Inference(format!(
                "expected {} features, got {}",
                w.ncols(),
                x.len()
            )));
        }
        let z = standardize(x, &self.means, &self.scales);
        let logits = w.dot(&z) + &ArrayView1::from(&self.intercepts[..]);
        let probs = softmax(logits.view());
        if probs.iter().all(|p| p.is_finite()) {
            Ok(probs.to_vec())
        } else {
            Err(ModelError::InvalidOutput("non-finite class probability".to_string()))
        }
    }
}

/// Read and parse a JSON artifact
pub(crate) fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ModelError> {
    if !path.exists() {
        return Err(ModelError::ArtifactMissing(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path).map_err(|e| ModelError::ArtifactLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| ModelError::ArtifactLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn standardize(x: &[f64], means: &[f64], scales: &[f64]) -> Array1<f64> {
    Array1::from_iter(x.iter().enumerate().map(|(i, v)| {
        let mean = means.get(i).copied().unwrap_or(0.0);
        let scale = match scales.get(i).copied() {
            Some(s) if s != 0.0 && s.is_finite() => s,
            _ => 1.0,
        };
        (v - mean) / scale
    }))
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

pub(crate) fn softmax(logits: ArrayView1<'_, f64>) -> Array1<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp = logits.mapv(|l| (l - max).exp());
    let sum = exp.sum();
    exp / sum
}

fn check_len(what: &str, got: usize, expected: usize) -> Result<(), String> {
    if got == expected {
        Ok(())
    } else {
        Err(format!("{}: expected {}, got {}", what, expected, got))
    }
}

fn check_optional_len(what: &str, got: usize, expected: usize) -> Result<(), String> {
    if got == 0 {
        Ok(())
    } else {
        check_len(what, got, expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid_and_softmax() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        let p = softmax(Array1::from(vec![1.0, 1.0, 1.0]).view());
        for v in p.iter() {
            assert!((v - 1.0 / 3.0).abs() < 1e-12);
        }
        // Large logits stay finite
        let p = softmax(Array1::from(vec![1000.0, 0.0, -1000.0]).view());
        assert!((p[0] - 1.0).abs() < 1e-12);
        assert!((p.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_logistic_standardizes() {
        let model = LogisticModel {
            means: vec![140.0],
            scales: vec![10.0],
            coefficients: vec![2.0],
            intercept: 0.0,
        };
        assert!((model.predict_proba(&[140.0]).unwrap() - 0.5).abs() < 1e-12);
        assert!(model.predict_proba(&[160.0]).unwrap() > 0.95);
        assert!(model.predict_proba(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_zero_scale_is_ignored() {
        let model = LogisticModel {
            means: vec![0.0],
            scales: vec![0.0],
            coefficients: vec![1.0],
            intercept: 0.0,
        };
        assert!((model.predict_proba(&[0.0]).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_softmax_model() {
        let model = SoftmaxModel {
            version: "1".to_string(),
            classes: vec!["a".into(), "b".into()],
            means: vec![],
            scales: vec![],
            coefficients: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            intercepts: vec![0.0, 0.0],
        };
        assert!(model.validate(2, 2).is_ok());
        let p = model.predict_proba(&[3.0, 1.0]).unwrap();
        assert!(p[0] > p[1]);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_shape_mismatch() {
        let model = SoftmaxModel {
            version: String::new(),
            classes: vec![],
            means: vec![0.0; 3],
            scales: vec![],
            coefficients: vec![vec![1.0, 0.0]; 3],
            intercepts: vec![0.0; 3],
        };
        let err = model.validate(2, 3).unwrap_err();
        assert!(err.contains("means"));
        assert!(model.validate(2, 4).is_err());
    }

    #[test]
    fn test_load_json_missing() {
        let dir = tempfile::tempdir().unwrap();
        let res: Result<LogisticModel, _> = load_json(&dir.path().join("nope.json"));
        assert!(matches!(res, Err(ModelError::ArtifactMissing(_))));
    }

    #[test]
    fn test_load_json_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let res: Result<LogisticModel, _> = load_json(&path);
        assert!(matches!(res, Err(ModelError::ArtifactLoad { .. })));
    }
}
