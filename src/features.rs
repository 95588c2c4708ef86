//! Feature window for streaming inference
//!
//! A long time-bounded buffer of samples from which a fixed-shape feature
//! vector is aggregated on demand.

use serde::{Deserialize, Serialize};

use crate::history::{population_std, HistoryBuffer};
use crate::simulator::Sample;

/// The subset of a sample the aggregates need
#[derive(Debug, Clone, PartialEq)]
pub struct WindowPoint {
    pub fhr_bpm: f64,
    pub uc_mmhg: f64,
    pub accel: bool,
    pub decel: bool,
    pub variability_bpm: Option<f64>,
}

impl From<&Sample> for WindowPoint {
    fn from(sample: &Sample) -> Self {
        Self {
            fhr_bpm: sample.fhr_bpm as f64,
            uc_mmhg: sample.uc_mmhg,
            accel: sample.accel,
            decel: sample.decel,
            variability_bpm: Some(sample.variability_bpm),
        }
    }
}

/// Named model input, in the column order the artifacts were trained on
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub fhr_mean: f64,
    pub fhr_std: f64,
    pub uc_mean: f64,
    pub uc_std: f64,
    pub accel_rate: f64,
    pub decel_rate: f64,
    pub variability_mean: f64,
}

impl FeatureVector {
    pub const LEN: usize = 7;

    pub const NAMES: [&'static str; Self::LEN] = [
        "fhr_mean",
        "fhr_std",
        "uc_mean",
        "uc_std",
        "accel_rate",
        "decel_rate",
        "variability_mean",
    ];

    pub fn to_array(&self) -> [f64; Self::LEN] {
        [
            self.fhr_mean,
            self.fhr_std,
            self.uc_mean,
            self.uc_std,
            self.accel_rate,
            self.decel_rate,
            self.variability_mean,
        ]
    }

    /// f32 copy for tensor inputs
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.to_array().iter().map(|v| *v as f32).collect()
    }

    pub fn is_zero(&self) -> bool {
        self.to_array().iter().all(|v| *v == 0.0)
    }
}

/// Rolling sample window with retention = context length
#[derive(Debug, Clone)]
pub struct FeatureWindow {
    points: HistoryBuffer<WindowPoint>,
}

impl FeatureWindow {
    pub fn new(context_ms: u64) -> Self {
        Self {
            points: HistoryBuffer::new(context_ms),
        }
    }

    pub fn context_ms(&self) -> u64 {
        self.points.retention_ms()
    }

    /// Widen or narrow the context; applied from the next observe on
    pub fn set_context_ms(&mut self, context_ms: u64) {
        let mut resized = HistoryBuffer::new(context_ms);
        for (ts, point) in self.points.iter() {
            resized.push(*ts, point.clone());
        }
        if let Some(latest) = resized.latest_ts() {
            resized.evict(latest);
        }
        self.points = resized;
    }

    /// Append a sample and evict anything older than the context
    pub fn observe(&mut self, sample: &Sample) {
        self.observe_point(sample.t_ms, WindowPoint::from(sample));
    }

    pub fn observe_point(&mut self, t_ms: u64, point: WindowPoint) {
        self.points.push(t_ms, point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Aggregate the retained samples. An empty window yields all zeros.
    pub fn aggregate(&self) -> FeatureVector {
        let n = self.points.len();
        if n == 0 {
            return FeatureVector::default();
        }
        let nf = n as f64;

        let fhr = || self.points.values().map(|p| p.fhr_bpm);
        let uc = || self.points.values().map(|p| p.uc_mmhg);

        let accel = self.points.values().filter(|p| p.accel).count() as f64;
        let decel = self.points.values().filter(|p| p.decel).count() as f64;

        let explicit: Option<Vec<f64>> = self.points.values().map(|p| p.variability_bpm).collect();
        let fhr_std = population_std(fhr());
        let variability_mean = match explicit {
            Some(values) => mean(values.into_iter()),
            None => fhr_std,
        };

        FeatureVector {
            fhr_mean: mean(fhr()),
            fhr_std,
            uc_mean: mean(uc()),
            uc_std: population_std(uc()),
            accel_rate: accel / nf,
            decel_rate: decel / nf,
            variability_mean,
        }
    }
}

fn mean<I: Iterator<Item = f64>>(values: I) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}
