//! Forced pathology sequence at the start of every session
//!
//! The first 10 s of simulated time walk through one pathology after another
//! so downstream consumers always see a transition early on.

use crate::rules::Condition;

/// End of the bradycardia phase (exclusive)
pub const BRADYCARDIA_END_MS: u64 = 3_000;
/// End of the tachycardia phase (exclusive)
pub const TACHYCARDIA_END_MS: u64 = 6_000;
/// End of the flat-trace phase (exclusive)
pub const LOW_VARIABILITY_END_MS: u64 = 8_000;
/// End of the whole warm-up (exclusive)
pub const WARMUP_END_MS: u64 = 10_000;

/// Heart rate ceiling while bradycardia is forced
pub const FORCED_BRADYCARDIA_BPM: u32 = 95;
/// Heart rate floor while tachycardia is forced
pub const FORCED_TACHYCARDIA_BPM: u32 = 170;
/// Raw heart-rate offset applied before smoothing during bradycardia
pub const BRADYCARDIA_RAW_OFFSET_BPM: f64 = -25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarmupPhase {
    Bradycardia,
    Tachycardia,
    LowVariability,
    ContractionBurst,
}

impl WarmupPhase {
    /// Phase active at simulated time `t_ms`, if any
    pub fn at(t_ms: u64) -> Option<Self> {
        match t_ms {
            t if t < BRADYCARDIA_END_MS => Some(WarmupPhase::Bradycardia),
            t if t < TACHYCARDIA_END_MS => Some(WarmupPhase::Tachycardia),
            t if t < LOW_VARIABILITY_END_MS => Some(WarmupPhase::LowVariability),
            t if t < WARMUP_END_MS => Some(WarmupPhase::ContractionBurst),
            _ => None,
        }
    }

    /// Condition the phase stands in for
    pub fn condition(&self) -> Condition {
        match self {
            WarmupPhase::Bradycardia => Condition::FetalBradycardia,
            WarmupPhase::Tachycardia => Condition::FetalTachycardia,
            WarmupPhase::LowVariability => Condition::ReducedVariability,
            WarmupPhase::ContractionBurst => Condition::UterineTachysystole,
        }
    }

    /// Rapid contraction oscillation used during the burst phase
    pub fn burst_uc(t_ms: u64) -> f64 {
        60.0 + 10.0 * (t_ms as f64 / 150.0).sin()
    }
}
