//! Synthetic CTG signal generator
//!
//! Produces one FHR/UC reading per tick:
//! - FHR: baseline + slow drift + Gaussian noise + event offsets, EMA-smoothed
//! - UC: base tonus + raised sine over `uc_period_sec` + Gaussian noise
//! - Medication modifiers applied in [`Medication`] order
//! - A time-boxed warm-up override (see [`warmup`])

mod events;
pub mod warmup;

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::clock::SessionRng;
use crate::config::SimulatorConfig;
use crate::medication::{Medication, MedicationSet};
use crate::rules::PathologyTag;

pub use events::{EventState, EventWindow};
pub use warmup::WarmupPhase;

/// Output clamp for the heart rate
pub const FHR_MIN_BPM: u32 = 50;
pub const FHR_MAX_BPM: u32 = 210;
/// Output clamp for the contraction trace
pub const UC_MIN: f64 = 0.0;
pub const UC_MAX: f64 = 100.0;
/// Variability never drops below this under magnesium
pub const MIN_VARIABILITY_BPM: f64 = 2.0;

/// One emitted observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Simulated milliseconds since session start
    pub t_ms: u64,
    pub fhr_bpm: u32,
    #[serde(rename = "uc_mmHg")]
    pub uc_mmhg: f64,
    pub baseline_bpm: u32,
    pub variability_bpm: f64,
    pub accel: bool,
    pub decel: bool,
    pub pathologies: Vec<PathologyTag>,
    pub medications: MedicationSet,
}

impl Sample {
    pub fn is_pathological(&self) -> bool {
        !self.pathologies.is_empty()
    }

    /// First tag in emission order, or an empty string
    pub fn primary_description(&self) -> String {
        crate::rules::primary_description(&self.pathologies)
    }
}

/// Raw generator output before history and rules are applied
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub t_ms: u64,
    pub fhr_bpm: u32,
    pub uc_mmhg: f64,
    pub baseline_bpm: u32,
    pub variability_bpm: f64,
    pub accel: bool,
    pub decel: bool,
    pub warmup: Option<WarmupPhase>,
}

/// Continuous-process and event state of one subject's trace
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    config: SimulatorConfig,
    rng: SessionRng,
    fhr_current: f64,
    variability_bpm: f64,
    events: EventState,
}

impl SignalGenerator {
    pub fn new(config: SimulatorConfig, rng: SessionRng) -> Self {
        Self {
            fhr_current: config.baseline_bpm as f64,
            variability_bpm: config.variability_bpm,
            events: EventState::default(),
            config,
            rng,
        }
    }

    /// Current variability magnitude (bpm)
    pub fn variability_bpm(&self) -> f64 {
        self.variability_bpm
    }

    /// Current smoothed heart rate before clamping
    pub fn smoothed_fhr(&self) -> f64 {
        self.fhr_current
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Generate the reading for simulated time `t_ms`
    pub fn step(&mut self, t_ms: u64, dt_sec: f64, medications: &MedicationSet) -> Reading {
        let warmup = if self.config.warmup_enabled {
            WarmupPhase::at(t_ms)
        } else {
            None
        };

        self.events.maybe_trigger(
            &mut self.rng,
            t_ms,
            dt_sec,
            self.config.accel_prob_per_sec,
            self.config.decel_prob_per_sec,
        );
        self.adapt_variability(medications);

        let (mut fhr, accel, decel) = self.fhr_value(t_ms, warmup, medications);
        let mut uc = self.uc_value(t_ms, medications);

        match warmup {
            Some(WarmupPhase::Bradycardia) => {
                fhr = fhr.min(warmup::FORCED_BRADYCARDIA_BPM);
            }
            Some(WarmupPhase::Tachycardia) => {
                fhr = fhr.max(warmup::FORCED_TACHYCARDIA_BPM);
            }
            Some(WarmupPhase::LowVariability) => {
                self.fhr_current = self.config.baseline_bpm as f64;
                fhr = self.config.baseline_bpm;
            }
            Some(WarmupPhase::ContractionBurst) => {
                uc = WarmupPhase::burst_uc(t_ms);
            }
            None => {}
        }

        Reading {
            t_ms,
            fhr_bpm: fhr.clamp(FHR_MIN_BPM, FHR_MAX_BPM),
            uc_mmhg: round2(uc.clamp(UC_MIN, UC_MAX)),
            baseline_bpm: self.config.baseline_bpm,
            variability_bpm: round2(self.variability_bpm),
            accel,
            decel,
            warmup,
        }
    }

    /// Magnesium lowers variability every tick; otherwise it relaxes back
    /// toward the configured baseline, more slowly under a tocolytic.
    fn adapt_variability(&mut self, medications: &MedicationSet) {
        if medications.contains(&Medication::Magnesium) {
            self.variability_bpm = (self.variability_bpm * 0.85).max(MIN_VARIABILITY_BPM);
            return;
        }
        let mut rate = self.config.variability_recovery_per_tick;
        if medications.contains(&Medication::Tocolytic) {
            rate *= 0.5;
        }
        let target = self.config.variability_bpm;
        self.variability_bpm += (target - self.variability_bpm) * rate.clamp(0.0, 1.0);
    }

    fn fhr_value(
        &mut self,
        t_ms: u64,
        warmup: Option<WarmupPhase>,
        medications: &MedicationSet,
    ) -> (u32, bool, bool) {
        let drift = self.config.drift_amplitude_bpm * (t_ms as f64 / self.config.drift_period_ms).sin();
        let noise = self.rng.gaussian(0.0, self.variability_bpm);
        let mut raw = self.config.baseline_bpm as f64 + drift + noise;

        if warmup == Some(WarmupPhase::Bradycardia) {
            raw += warmup::BRADYCARDIA_RAW_OFFSET_BPM;
        }

        for med in medications {
            match med {
                Medication::Tocolytic => raw += 3.0,
                Medication::Magnesium => raw -= 2.0,
                Medication::Oxytocin => {}
            }
        }

        let accel = self.events.accel.is_active(t_ms);
        let decel = self.events.decel.is_active(t_ms);
        raw += self.events.accel.offset_at(t_ms);
        raw += self.events.decel.offset_at(t_ms);

        let a = self.config.smoothing_alpha;
        self.fhr_current = (1.0 - a) * self.fhr_current + a * raw;
        let fhr = self
            .fhr_current
            .clamp(FHR_MIN_BPM as f64, FHR_MAX_BPM as f64)
            .round() as u32;
        (fhr, accel, decel)
    }

    fn uc_value(&mut self, t_ms: u64, medications: &MedicationSet) -> f64 {
        let cfg = &self.config;
        let t = t_ms as f64 / 1000.0;
        let phase = 2.0 * PI * (t % cfg.uc_period_sec) / cfg.uc_period_sec;
        let wave = (phase.sin() + 1.0) / 2.0;
        let mut value = cfg.uc_base + wave * (cfg.uc_peak - cfg.uc_base);
        value += self.rng.gaussian(0.0, cfg.uc_noise_std);

        for med in medications {
            value = match med {
                Medication::Tocolytic => value * 0.7,
                Medication::Magnesium => (value - 8.0).max(UC_MIN),
                Medication::Oxytocin => (value * 1.25 + 5.0).min(UC_MAX),
            };
        }
        value.clamp(UC_MIN, UC_MAX)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
