//! Clinical reading of classifier output: recommendations, alerts and
//! per-session statistics.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::models::{ClassifierResult, FetalHealth};

/// Confidence above which a Normal result needs no extra monitoring and a
/// Suspect result raises an alert
pub const HIGH_CONFIDENCE: f64 = 0.8;
/// Confidence below which a repeat examination is suggested
pub const LOW_CONFIDENCE: f64 = 0.6;

/// Recommended actions for a classification
pub fn recommendations(result: &ClassifierResult) -> Vec<String> {
    let mut out: Vec<&str> = match result.label {
        FetalHealth::Normal if result.confidence > HIGH_CONFIDENCE => {
            vec!["Fetal state normal. Continue routine monitoring."]
        }
        FetalHealth::Normal => {
            vec!["Fetal state normal, but additional monitoring is required."]
        }
        FetalHealth::Suspect => vec![
            "Suspicious signs detected. Intensify monitoring.",
            "Run additional examinations: ultrasound, Doppler.",
            "Consider hospitalization.",
        ],
        FetalHealth::Pathological => vec![
            "CRITICAL STATE! Immediate hospitalization.",
            "Emergency examination and specialist consultation.",
            "Consider emergency delivery.",
        ],
    };
    if result.confidence < LOW_CONFIDENCE {
        out.push("Low prediction confidence. Repeat the examination.");
    }
    out.into_iter().map(String::from).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalAlert {
    pub severity: AlertSeverity,
    pub message: String,
    pub confidence: f64,
    /// Simulated time of the inference that raised it
    pub at_ms: u64,
}

impl ClinicalAlert {
    /// Alert for a Pathological result, or a Suspect one above [`HIGH_CONFIDENCE`]
    pub fn evaluate(result: &ClassifierResult, at_ms: u64) -> Option<Self> {
        let severity = match result.label {
            FetalHealth::Pathological => AlertSeverity::Critical,
            FetalHealth::Suspect if result.confidence > HIGH_CONFIDENCE => AlertSeverity::Warning,
            _ => return None,
        };
        Some(Self {
            severity,
            message: format!("Critical state: {}", result.label),
            confidence: result.confidence,
            at_ms,
        })
    }
}

/// Running inference statistics of one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_inferences: u64,
    pub label_distribution: BTreeMap<FetalHealth, u64>,
    pub average_confidence: f64,
    pub total_alerts: u64,
    pub alert_distribution: BTreeMap<AlertSeverity, u64>,
    pub inference_errors: u64,
    pub last_inference_ms: Option<u64>,
}

impl SessionStats {
    pub fn record(&mut self, result: &ClassifierResult, alert: Option<&ClinicalAlert>, at_ms: u64) {
        self.total_inferences += 1;
        *self.label_distribution.entry(result.label).or_insert(0) += 1;
        let n = self.total_inferences as f64;
        self.average_confidence += (result.confidence - self.average_confidence) / n;
        if let Some(alert) = alert {
            self.total_alerts += 1;
            *self.alert_distribution.entry(alert.severity).or_insert(0) += 1;
        }
        self.last_inference_ms = Some(at_ms);
    }

    pub fn record_error(&mut self) {
        self.inference_errors += 1;
    }
}

/// One classification kept in the session's prediction history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionEntry {
    pub at_ms: u64,
    pub result: ClassifierResult,
}

/// Bounded alert log and prediction history of one session.
///
/// Both are rings: once full, the oldest entry is dropped. Alerts stay until
/// cleared so late or lagging consumers can still query them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClinicalLog {
    alerts: VecDeque<ClinicalAlert>,
    predictions: VecDeque<PredictionEntry>,
    #[serde(skip)]
    alert_capacity: usize,
    #[serde(skip)]
    prediction_capacity: usize,
}

impl ClinicalLog {
    pub fn new(alert_capacity: usize, prediction_capacity: usize) -> Self {
        Self {
            alerts: VecDeque::with_capacity(alert_capacity.min(1_024)),
            predictions: VecDeque::with_capacity(prediction_capacity.min(1_024)),
            alert_capacity,
            prediction_capacity,
        }
    }

    pub fn record(&mut self, result: &ClassifierResult, alert: Option<&ClinicalAlert>, at_ms: u64) {
        push_bounded(
            &mut self.predictions,
            PredictionEntry {
                at_ms,
                result: result.clone(),
            },
            self.prediction_capacity,
        );
        if let Some(alert) = alert {
            push_bounded(&mut self.alerts, alert.clone(), self.alert_capacity);
        }
    }

    /// Retained alerts, oldest first, optionally of one severity only
    pub fn alerts(&self, severity: Option<AlertSeverity>) -> Vec<ClinicalAlert> {
        self.alerts
            .iter()
            .filter(|a| severity.map_or(true, |s| a.severity == s))
            .cloned()
            .collect()
    }

    pub fn clear_alerts(&mut self) {
        self.alerts.clear();
    }

    /// The `limit` most recent classifications, oldest first. `None` or 0 returns all.
    pub fn history(&self, limit: Option<usize>) -> Vec<PredictionEntry> {
        let skip = match limit {
            Some(n) if n > 0 => self.predictions.len().saturating_sub(n),
            _ => 0,
        };
        self.predictions.iter().skip(skip).cloned().collect()
    }
}

fn push_bounded<T>(ring: &mut VecDeque<T>, item: T, capacity: usize) {
    if capacity == 0 {
        return;
    }
    while ring.len() >= capacity {
        ring.pop_front();
    }
    ring.push_back(item);
}
