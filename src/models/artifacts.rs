//! Artifact locations and load diagnostics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::classifier::{BackendKind, ClassifierAdapter};
use super::forecast::ForecastAdapter;
use crate::features::FeatureVector;

/// File layout of one model directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    dir: PathBuf,
    model_name: String,
}

impl ArtifactPaths {
    pub fn new(dir: impl Into<PathBuf>, model_name: &str) -> Self {
        Self {
            dir: dir.into(),
            model_name: model_name.to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn onnx_int8(&self) -> PathBuf {
        self.dir.join(format!("{}.int8.onnx", self.model_name))
    }

    pub fn onnx_fp32(&self) -> PathBuf {
        self.dir.join(format!("{}.onnx", self.model_name))
    }

    /// ONNX graphs on disk in load order: quantized first, then full precision
    pub fn onnx_candidates(&self) -> Vec<PathBuf> {
        [self.onnx_int8(), self.onnx_fp32()]
            .into_iter()
            .filter(|p| p.exists())
            .collect()
    }

    pub fn reference_classifier(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.model_name))
    }

    pub fn forecast(&self, horizon_min: u32) -> PathBuf {
        self.dir.join(format!("forecast_model_{}.json", horizon_min))
    }
}

/// Presence, size and mtime of one artifact file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStatus {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

pub fn file_status(path: &Path) -> FileStatus {
    match std::fs::metadata(path) {
        Ok(meta) => FileStatus {
            exists: true,
            size: Some(meta.len()),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        },
        Err(_) => FileStatus {
            exists: false,
            size: None,
            modified: None,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSource {
    pub kind: BackendKind,
    pub path: Option<PathBuf>,
}

/// Snapshot of what was loaded and what is on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub active_backend: BackendKind,
    pub degraded: bool,
    pub feature_count: usize,
    pub loaded_forecast_horizons: Vec<u32>,
    pub active_model_source: ModelSource,
    pub files: BTreeMap<String, FileStatus>,
}

impl Diagnostics {
    pub fn collect(
        paths: &ArtifactPaths,
        classifier: &ClassifierAdapter,
        forecaster: &ForecastAdapter,
        configured_horizons: &[u32],
    ) -> Self {
        let mut files = BTreeMap::new();
        files.insert("onnx_int8".to_string(), file_status(&paths.onnx_int8()));
        files.insert("onnx_fp32".to_string(), file_status(&paths.onnx_fp32()));
        files.insert(
            "classifier_reference".to_string(),
            file_status(&paths.reference_classifier()),
        );
        for h in configured_horizons {
            files.insert(format!("forecast_{}", h), file_status(&paths.forecast(*h)));
        }

        Self {
            active_backend: classifier.active_backend(),
            degraded: classifier.is_degraded(),
            feature_count: FeatureVector::LEN,
            loaded_forecast_horizons: forecaster.loaded_horizons(),
            active_model_source: ModelSource {
                kind: classifier.active_backend(),
                path: classifier.active_source(),
            },
            files,
        }
    }
}
