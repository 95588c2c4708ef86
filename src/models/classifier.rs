//! Three-class fetal health classifier with interchangeable backends

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use super::artifacts::ArtifactPaths;
use super::linear::{load_json, SoftmaxModel};
use super::onnx::OnnxClassifier;
use super::ModelError;
use crate::features::FeatureVector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FetalHealth {
    Normal,
    Suspect,
    Pathological,
}

impl FetalHealth {
    pub const ALL: [FetalHealth; 3] = [
        FetalHealth::Normal,
        FetalHealth::Suspect,
        FetalHealth::Pathological,
    ];

    /// Numeric code used by the training labels (1 = normal)
    pub fn code(&self) -> u8 {
        match self {
            FetalHealth::Normal => 1,
            FetalHealth::Suspect => 2,
            FetalHealth::Pathological => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Class name as written in model artifacts: the label in any case, or
    /// its numeric code ("3", "3.0")
    pub fn from_class_name(name: &str) -> Option<Self> {
        let name = name.trim();
        if let Ok(code) = name.parse::<f64>() {
            return Self::ALL.into_iter().find(|h| f64::from(h.code()) == code);
        }
        Self::ALL
            .into_iter()
            .find(|h| h.as_str().eq_ignore_ascii_case(name))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FetalHealth::Normal => "Normal",
            FetalHealth::Suspect => "Suspect",
            FetalHealth::Pathological => "Pathological",
        }
    }
}

impl fmt::Display for FetalHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities {
    pub normal: f64,
    pub suspect: f64,
    pub pathological: f64,
}

impl ClassProbabilities {
    pub fn uniform() -> Self {
        let p = 1.0 / 3.0;
        Self {
            normal: p,
            suspect: p,
            pathological: p,
        }
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.normal, self.suspect, self.pathological]
    }

    /// Build from raw backend output, renormalizing if needed
    pub fn from_slice(values: &[f64]) -> Result<Self, ModelError> {
        if values.len() < 3 {
            return Err(ModelError::InvalidOutput(format!(
                "expected 3 class probabilities, got {}",
                values.len()
            )));
        }
        let v = &values[..3];
        if v.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(ModelError::InvalidOutput(format!("bad probabilities {:?}", v)));
        }
        let sum: f64 = v.iter().sum();
        if sum <= 0.0 {
            return Err(ModelError::InvalidOutput("probabilities sum to zero".to_string()));
        }
        Ok(Self {
            normal: v[0] / sum,
            suspect: v[1] / sum,
            pathological: v[2] / sum,
        })
    }

    /// Most probable class; ties resolve to the less severe class
    pub fn argmax(&self) -> (FetalHealth, f64) {
        let values = self.as_array();
        let mut best = 0;
        for i in 1..values.len() {
            if values[i] > values[best] {
                best = i;
            }
        }
        (FetalHealth::ALL[best], values[best])
    }
}

/// Which backend produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Onnx,
    Reference,
    Degraded,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Onnx => "onnx",
            BackendKind::Reference => "reference",
            BackendKind::Degraded => "degraded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierResult {
    pub label: FetalHealth,
    pub code: u8,
    pub probabilities: ClassProbabilities,
    /// Highest class probability
    pub confidence: f64,
    pub backend: BackendKind,
}

impl ClassifierResult {
    pub fn from_probabilities(probabilities: ClassProbabilities, backend: BackendKind) -> Self {
        let (label, confidence) = probabilities.argmax();
        Self {
            label,
            code: label.code(),
            probabilities,
            confidence,
            backend,
        }
    }
}

/// A loaded classifier implementation
pub trait ClassifierBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Artifact the backend was loaded from
    fn source(&self) -> Option<&Path>;

    fn predict(&self, features: &FeatureVector) -> Result<ClassProbabilities, ModelError>;
}

/// Reference backend: standardized softmax model from JSON
pub struct ReferenceClassifier {
    model: SoftmaxModel,
    /// Model output index for Normal, Suspect and Pathological
    output_index: [usize; 3],
    path: PathBuf,
}

impl ReferenceClassifier {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let model: SoftmaxModel = load_json(path)?;
        Self::from_model(model, path.to_path_buf())
    }

    pub fn from_model(model: SoftmaxModel, path: PathBuf) -> Result<Self, ModelError> {
        let output_index = model
            .validate(FeatureVector::LEN, FetalHealth::ALL.len())
            .and_then(|_| class_order(&model.classes))
            .map_err(|reason| ModelError::ArtifactLoad {
                path: path.clone(),
                reason,
            })?;
        info!(
            "Reference classifier loaded from {:?} (version {:?})",
            path, model.version
        );
        Ok(Self {
            model,
            output_index,
            path,
        })
    }
}

impl ClassifierBackend for ReferenceClassifier {
    fn kind(&self) -> BackendKind {
        BackendKind::Reference
    }

    fn source(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn predict(&self, features: &FeatureVector) -> Result<ClassProbabilities, ModelError> {
        let probs = self.model.predict_proba(&features.to_array())?;
        let ordered: Vec<f64> = self
            .output_index
            .iter()
            .map(|&i| probs.get(i).copied().unwrap_or(f64::NAN))
            .collect();
        ClassProbabilities::from_slice(&ordered)
    }
}

/// Map artifact class names to output positions. No names means the
/// outputs are already in Normal, Suspect, Pathological order.
fn class_order(classes: &[String]) -> Result<[usize; 3], String> {
    if classes.is_empty() {
        return Ok([0, 1, 2]);
    }
    let mut order = [None; 3];
    for (output, name) in classes.iter().enumerate() {
        let health = FetalHealth::from_class_name(name)
            .ok_or_else(|| format!("unknown class {:?}", name))?;
        let slot = &mut order[health.code() as usize - 1];
        if slot.is_some() {
            return Err(format!("duplicate class {:?}", name));
        }
        *slot = Some(output);
    }
    match order {
        [Some(n), Some(s), Some(p)] => Ok([n, s, p]),
        _ => Err(format!("classes {:?} do not cover all three labels", classes)),
    }
}

/// Constant stand-in used when no artifact could be loaded
pub struct DegradedClassifier;

impl ClassifierBackend for DegradedClassifier {
    fn kind(&self) -> BackendKind {
        BackendKind::Degraded
    }

    fn source(&self) -> Option<&Path> {
        None
    }

    fn predict(&self, _features: &FeatureVector) -> Result<ClassProbabilities, ModelError> {
        Ok(ClassProbabilities::uniform())
    }
}

/// First candidate that loads; failures are logged and the next one is tried
fn load_first<T>(
    candidates: &[PathBuf],
    load: impl Fn(&Path) -> Result<T, ModelError>,
) -> Option<T> {
    for path in candidates {
        match load(path) {
            Ok(backend) => return Some(backend),
            Err(e) => warn!("Classifier artifact {:?} unusable: {}", path, e),
        }
    }
    None
}

/// Classifier facade: optimized backend first, reference on failure
pub struct ClassifierAdapter {
    primary: Option<Box<dyn ClassifierBackend>>,
    reference: Option<Box<dyn ClassifierBackend>>,
    /// Set once the primary backend fails at inference time
    primary_failed: AtomicBool,
}

impl ClassifierAdapter {
    pub fn new(
        primary: Option<Box<dyn ClassifierBackend>>,
        reference: Option<Box<dyn ClassifierBackend>>,
    ) -> Self {
        Self {
            primary,
            reference,
            primary_failed: AtomicBool::new(false),
        }
    }

    /// Adapter with no artifacts
    pub fn degraded() -> Self {
        Self::new(None, None)
    }

    /// Load whatever artifacts exist. Never fails.
    pub fn load(paths: &ArtifactPaths, n_threads: usize) -> Self {
        let candidates = paths.onnx_candidates();
        if candidates.is_empty() {
            debug!("No ONNX classifier in {:?}", paths.dir());
        }
        let primary: Option<Box<dyn ClassifierBackend>> =
            load_first(&candidates, |path| OnnxClassifier::load(path, n_threads))
                .map(|c| Box::new(c) as Box<dyn ClassifierBackend>);

        let reference: Option<Box<dyn ClassifierBackend>> =
            match ReferenceClassifier::load(&paths.reference_classifier()) {
                Ok(c) => Some(Box::new(c)),
                Err(ModelError::ArtifactMissing(path)) => {
                    debug!("No reference classifier at {:?}", path);
                    None
                }
                Err(e) => {
                    warn!("Failed to load reference classifier: {}", e);
                    None
                }
            };

        let adapter = Self::new(primary, reference);
        if adapter.is_degraded() {
            warn!(
                "No classifier artifact in {:?}, using degraded constant classifier",
                paths.dir()
            );
        } else {
            info!("Classifier backend: {}", adapter.active_backend().as_str());
        }
        adapter
    }

    fn primary_usable(&self) -> Option<&dyn ClassifierBackend> {
        if self.primary_failed.load(Ordering::Relaxed) {
            None
        } else {
            self.primary.as_deref()
        }
    }

    pub fn active_backend(&self) -> BackendKind {
        self.active().map(|b| b.kind()).unwrap_or(BackendKind::Degraded)
    }

    pub fn active_source(&self) -> Option<PathBuf> {
        self.active().and_then(|b| b.source().map(Path::to_path_buf))
    }

    fn active(&self) -> Option<&dyn ClassifierBackend> {
        self.primary_usable().or(self.reference.as_deref())
    }

    pub fn is_degraded(&self) -> bool {
        self.primary.is_none() && self.reference.is_none()
    }

    /// Classify one feature vector.
    ///
    /// A primary failure switches to the reference backend for good. An error
    /// is returned only when every loaded backend failed on this input.
    pub fn classify(&self, features: &FeatureVector) -> Result<ClassifierResult, ModelError> {
        if self.is_degraded() {
            let probs = DegradedClassifier.predict(features)?;
            return Ok(ClassifierResult::from_probabilities(probs, BackendKind::Degraded));
        }

        let mut last_err = None;
        if let Some(primary) = self.primary_usable() {
            match primary.predict(features) {
                Ok(probs) => return Ok(ClassifierResult::from_probabilities(probs, primary.kind())),
                Err(e) => {
                    if self.reference.is_some() {
                        warn!("Primary classifier failed, switching to reference: {}", e);
                        self.primary_failed.store(true, Ordering::Relaxed);
                    }
                    last_err = Some(e);
                }
            }
        }

        if let Some(reference) = self.reference.as_deref() {
            return reference
                .predict(features)
                .map(|probs| ClassifierResult::from_probabilities(probs, reference.kind()));
        }

        Err(last_err.unwrap_or_else(|| ModelError::Inference("no classifier backend".to_string())))
    }
}
