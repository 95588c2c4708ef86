//! ONNX Runtime classifier backend.
//!
//! Expects a single `[1, 7]` f32 input. The first f32 output with at least
//! three values is read as class scores; scores that are not already a
//! distribution are passed through softmax.

#[cfg(feature = "onnx")]
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use std::path::Path;
#[cfg(feature = "onnx")]
use std::{path::PathBuf, sync::Mutex};

use super::classifier::{BackendKind, ClassProbabilities, ClassifierBackend};
use super::ModelError;
use crate::features::FeatureVector;

/// Optimized classifier backed by an ONNX graph
#[cfg(feature = "onnx")]
pub struct OnnxClassifier {
    session: Mutex<Session>,
    path: PathBuf,
}

#[cfg(feature = "onnx")]
impl OnnxClassifier {
    pub fn load(path: &Path, n_threads: usize) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::ArtifactMissing(path.to_path_buf()));
        }
        let load_err = |e: ort::Error| ModelError::ArtifactLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let session = Session::builder()
            .map_err(load_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_err)?
            .with_intra_threads(n_threads.max(1))
            .map_err(load_err)?
            .commit_from_file(path)
            .map_err(load_err)?;

        tracing::info!("ONNX classifier initialized with model: {:?}", path);

        Ok(Self {
            session: Mutex::new(session),
            path: path.to_path_buf(),
        })
    }
}

#[cfg(feature = "onnx")]
impl ClassifierBackend for OnnxClassifier {
    fn kind(&self) -> BackendKind {
        BackendKind::Onnx
    }

    fn source(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn predict(&self, features: &FeatureVector) -> Result<ClassProbabilities, ModelError> {
        let input_shape = [1_usize, FeatureVector::LEN];
        let input_tensor = Value::from_array((input_shape, features.to_f32_vec()))
            .map_err(|e: ort::Error| ModelError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ModelError::Inference("ONNX session lock poisoned".to_string()))?;

        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e: ort::Error| ModelError::Inference(e.to_string()))?;

        // Classifier exports may emit an int64 label first; skip non-f32 outputs
        for (_, output) in outputs.iter() {
            let Ok(tensor) = output.try_extract_tensor::<f32>() else {
                continue;
            };
            let values: Vec<f64> = tensor.1.iter().map(|v| *v as f64).collect();
            if values.len() >= 3 {
                return scores_to_probabilities(&values[..3]);
            }
        }

        Err(ModelError::InvalidOutput(
            "no f32 output with 3 class scores".to_string(),
        ))
    }
}

// Stub implementation when feature is not enabled
#[cfg(not(feature = "onnx"))]
pub struct OnnxClassifier;

#[cfg(not(feature = "onnx"))]
impl OnnxClassifier {
    pub fn load(_path: &Path, _n_threads: usize) -> Result<Self, ModelError> {
        Err(ModelError::FeatureNotEnabled("onnx"))
    }
}

#[cfg(not(feature = "onnx"))]
impl ClassifierBackend for OnnxClassifier {
    fn kind(&self) -> BackendKind {
        BackendKind::Onnx
    }

    fn source(&self) -> Option<&Path> {
        None
    }

    fn predict(&self, _features: &FeatureVector) -> Result<ClassProbabilities, ModelError> {
        Err(ModelError::FeatureNotEnabled("onnx"))
    }
}

/// Accept probabilities as-is, softmax anything that looks like logits
#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
fn scores_to_probabilities(values: &[f64]) -> Result<ClassProbabilities, ModelError> {
    let is_distribution = values.iter().all(|v| (0.0..=1.0).contains(v))
        && (values.iter().sum::<f64>() - 1.0).abs() < 1e-3;
    if is_distribution {
        ClassProbabilities::from_slice(values)
    } else {
        let probs = super::linear::softmax(ndarray::ArrayView1::from(values));
        ClassProbabilities::from_slice(probs.as_slice().unwrap_or(&[]))
    }
}
