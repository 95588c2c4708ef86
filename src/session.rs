//! Per-subject monitoring session.
//!
//! `MonitorSession` is the synchronous core of one subject: every `tick()`
//! advances simulated time by one interval, generates a sample, updates the
//! rolling buffers, tags the sample and, when the throttle allows, refreshes
//! the inference snapshot. The async scheduler owns one of these per task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::assessment::{recommendations, ClinicalAlert, SessionStats};
use crate::clock::{SessionRng, SimClock};
use crate::config::{EngineConfig, RuleThresholds};
use crate::features::FeatureWindow;
use crate::history::{ContractionPeaks, HistoryBuffer};
use crate::inference::{InferenceEngine, InferenceFailure, InferenceSnapshot, InferenceThrottle};
use crate::logging;
use crate::medication::MedicationSet;
use crate::rules::{self, RuleInput};
use crate::simulator::{Sample, SignalGenerator};

/// Everything a consumer receives for one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedRecord {
    pub subject_id: String,
    pub session_id: Uuid,
    /// Wall-clock emission time
    pub emitted_at: DateTime<Utc>,
    pub sample: Sample,
    pub pathological: bool,
    pub primary_description: String,
    pub inference: InferenceSnapshot,
    /// Raised only on the tick whose inference produced it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<ClinicalAlert>,
}

impl CombinedRecord {
    /// One line of newline-delimited JSON (no trailing newline)
    pub fn to_ndjson_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub struct MonitorSession {
    subject_id: String,
    session_id: Uuid,
    clock: SimClock,
    generator: SignalGenerator,
    fhr_history: HistoryBuffer<u32>,
    uc_history: HistoryBuffer<f64>,
    peaks: ContractionPeaks,
    window: FeatureWindow,
    rules: RuleThresholds,
    medications: MedicationSet,
    engine: Arc<InferenceEngine>,
    throttle: InferenceThrottle,
    snapshot: InferenceSnapshot,
    stats: SessionStats,
}

impl MonitorSession {
    /// New session seeded from the subject id
    pub fn new(
        subject_id: &str,
        config: &EngineConfig,
        engine: Arc<InferenceEngine>,
        medications: MedicationSet,
    ) -> Self {
        let history_ms = config.history.history_window_sec.saturating_mul(1000);
        let rng = SessionRng::for_subject(subject_id);
        let session_id = Uuid::new_v4();

        logging::log_session_start(session_id, subject_id, &medications);

        Self {
            subject_id: subject_id.to_string(),
            session_id,
            clock: SimClock::new(config.scheduler.tick_interval_ms),
            generator: SignalGenerator::new(config.simulator.clone(), rng),
            fhr_history: HistoryBuffer::new(history_ms),
            uc_history: HistoryBuffer::new(history_ms),
            peaks: ContractionPeaks::new(
                config.rules.contraction_peak_threshold,
                config.rules.min_peak_spacing_ms,
                history_ms,
                config.simulator.uc_base,
            ),
            window: FeatureWindow::new(engine.context_ms(&config.history)),
            rules: config.rules.clone(),
            medications,
            throttle: InferenceThrottle::new(config.scheduler.inference_interval_ms()),
            engine,
            snapshot: InferenceSnapshot::default(),
            stats: SessionStats::default(),
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn ticks(&self) -> u64 {
        self.clock.ticks()
    }

    pub fn medications(&self) -> &MedicationSet {
        &self.medications
    }

    /// Replace the active medication set; applies from the next tick
    pub fn set_medications(&mut self, medications: MedicationSet) {
        if medications != self.medications {
            logging::log_medications_changed(self.session_id, &self.medications, &medications);
            self.medications = medications;
        }
    }

    pub fn snapshot(&self) -> &InferenceSnapshot {
        &self.snapshot
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn variability_bpm(&self) -> f64 {
        self.generator.variability_bpm()
    }

    pub fn fhr_history(&self) -> &HistoryBuffer<u32> {
        &self.fhr_history
    }

    pub fn uc_history(&self) -> &HistoryBuffer<f64> {
        &self.uc_history
    }

    pub fn peak_count(&self) -> usize {
        self.peaks.count()
    }

    pub fn feature_window(&self) -> &FeatureWindow {
        &self.window
    }

    /// Advance one interval and build the record for it
    pub fn tick(&mut self) -> CombinedRecord {
        let sample = self.next_sample();
        let alert = self.maybe_infer(sample.t_ms);

        CombinedRecord {
            subject_id: self.subject_id.clone(),
            session_id: self.session_id,
            emitted_at: Utc::now(),
            pathological: sample.is_pathological(),
            primary_description: sample.primary_description(),
            sample,
            inference: self.snapshot.clone(),
            alert,
        }
    }

    /// Generate, buffer and tag one sample
    pub fn next_sample(&mut self) -> Sample {
        let t_ms = self.clock.advance();
        let reading = self
            .generator
            .step(t_ms, self.clock.interval_secs(), &self.medications);

        self.fhr_history.push(t_ms, reading.fhr_bpm);
        self.uc_history.push(t_ms, reading.uc_mmhg);
        if self.peaks.observe(t_ms, reading.uc_mmhg) {
            debug!("Session {} contraction peak at {} ms", self.session_id, t_ms);
        }

        let pathologies = rules::evaluate(
            &RuleInput {
                fhr_bpm: reading.fhr_bpm,
                warmup: reading.warmup,
                fhr_history: &self.fhr_history,
                peak_count: self.peaks.count(),
            },
            &self.rules,
        );

        let sample = Sample {
            t_ms,
            fhr_bpm: reading.fhr_bpm,
            uc_mmhg: reading.uc_mmhg,
            baseline_bpm: reading.baseline_bpm,
            variability_bpm: reading.variability_bpm,
            accel: reading.accel,
            decel: reading.decel,
            pathologies,
            medications: self.medications.clone(),
        };
        self.window.observe(&sample);
        sample
    }

    /// Refresh the snapshot if the throttle window has elapsed
    fn maybe_infer(&mut self, t_ms: u64) -> Option<ClinicalAlert> {
        if !self.throttle.is_due(t_ms) {
            return None;
        }
        self.throttle.mark(t_ms);

        let features = self.window.aggregate();
        match self.engine.run(&features) {
            Ok(output) => {
                let alert = ClinicalAlert::evaluate(&output.classification, t_ms);
                if let Some(ref a) = alert {
                    logging::log_clinical_alert(self.session_id, a);
                }
                self.stats.record(&output.classification, alert.as_ref(), t_ms);
                self.snapshot = InferenceSnapshot {
                    recommendations: recommendations(&output.classification),
                    classification: Some(output.classification),
                    forecast: output.forecast,
                    inferred_at_ms: Some(t_ms),
                    error: None,
                };
                alert
            }
            Err(e) => {
                warn!("Session {} inference failed at {} ms: {}", self.session_id, t_ms, e);
                self.stats.record_error();
                self.snapshot.error = Some(InferenceFailure {
                    message: e.to_string(),
                    at_ms: t_ms,
                });
                None
            }
        }
    }
}
