//! Acceleration / deceleration event windows

use crate::clock::SessionRng;

/// Duration range of an acceleration (ms)
pub const ACCEL_DURATION_MS: (u64, u64) = (15_000, 30_000);
/// Magnitude range of an acceleration (bpm)
pub const ACCEL_MAGNITUDE_BPM: (f64, f64) = (10.0, 25.0);
/// Duration range of a deceleration (ms)
pub const DECEL_DURATION_MS: (u64, u64) = (10_000, 25_000);
/// Magnitude range of a deceleration (bpm, applied as a drop)
pub const DECEL_MAGNITUDE_BPM: (f64, f64) = (10.0, 30.0);

/// One event kind's current window
#[derive(Debug, Clone, Default)]
pub struct EventWindow {
    /// Simulated time the window ends (exclusive)
    pub until_ms: u64,
    /// Signed bpm offset layered onto the raw heart rate
    pub offset_bpm: f64,
}

impl EventWindow {
    pub fn is_active(&self, t_ms: u64) -> bool {
        t_ms < self.until_ms
    }

    /// Offset contributed at `t_ms`, zero when inactive
    pub fn offset_at(&self, t_ms: u64) -> f64 {
        if self.is_active(t_ms) {
            self.offset_bpm
        } else {
            0.0
        }
    }

    fn start(&mut self, t_ms: u64, duration_ms: u64, offset_bpm: f64) {
        self.until_ms = t_ms + duration_ms;
        self.offset_bpm = offset_bpm;
    }
}

/// Acceleration and deceleration state of one session
#[derive(Debug, Clone, Default)]
pub struct EventState {
    pub accel: EventWindow,
    pub decel: EventWindow,
}

impl EventState {
    /// Roll for new events at `t_ms`. A new event replaces the running one.
    pub fn maybe_trigger(
        &mut self,
        rng: &mut SessionRng,
        t_ms: u64,
        dt_sec: f64,
        accel_prob_per_sec: f64,
        decel_prob_per_sec: f64,
    ) {
        if rng.event_fires(accel_prob_per_sec, dt_sec) {
            let duration = rng.range_u64(ACCEL_DURATION_MS.0, ACCEL_DURATION_MS.1);
            let magnitude = rng.uniform(ACCEL_MAGNITUDE_BPM.0, ACCEL_MAGNITUDE_BPM.1);
            self.accel.start(t_ms, duration, magnitude);
        }
        if rng.event_fires(decel_prob_per_sec, dt_sec) {
            let duration = rng.range_u64(DECEL_DURATION_MS.0, DECEL_DURATION_MS.1);
            let magnitude = rng.uniform(DECEL_MAGNITUDE_BPM.0, DECEL_MAGNITUDE_BPM.1);
            self.decel.start(t_ms, duration, -magnitude);
        }
    }
}
