//! Per-session simulated clock and deterministic randomness
//!
//! Simulated time advances by exactly one tick interval per generated sample,
//! so a session's trace depends only on its subject id and configuration,
//! never on wall-clock scheduling jitter.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use sha2::{Digest, Sha256};

/// Monotonic simulated clock driven by tick count
#[derive(Debug, Clone)]
pub struct SimClock {
    interval_ms: u64,
    ticks: u64,
}

impl SimClock {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            ticks: 0,
        }
    }

    /// Elapsed time for the next sample, then advance
    pub fn advance(&mut self) -> u64 {
        let t_ms = self.ticks * self.interval_ms;
        self.ticks += 1;
        t_ms
    }

    /// Number of ticks issued so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Tick interval in seconds (the Δt used for per-tick event probabilities)
    pub fn interval_secs(&self) -> f64 {
        self.interval_ms as f64 / 1000.0
    }
}

/// Derive a stable 64-bit seed from a subject identifier
pub fn seed_for_subject(subject_id: &str) -> u64 {
    let digest = Sha256::digest(subject_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[0..8]);
    u64::from_le_bytes(bytes)
}

/// Seeded random source owned by one session
#[derive(Debug, Clone)]
pub struct SessionRng {
    rng: ChaCha8Rng,
}

impl SessionRng {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn for_subject(subject_id: &str) -> Self {
        Self::from_seed(seed_for_subject(subject_id))
    }

    /// Uniform draw in [0, 1)
    pub fn unit(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Uniform draw in [low, high]
    pub fn uniform(&mut self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        self.rng.gen_range(low..=high)
    }

    /// Uniform integer draw in [low, high]
    pub fn range_u64(&mut self, low: u64, high: u64) -> u64 {
        if high <= low {
            return low;
        }
        self.rng.gen_range(low..=high)
    }

    /// Gaussian draw; a non-positive or non-finite std yields the mean
    pub fn gaussian(&mut self, mean: f64, std_dev: f64) -> f64 {
        if std_dev <= 0.0 || !std_dev.is_finite() {
            return mean;
        }
        match Normal::new(mean, std_dev) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => mean,
        }
    }

    /// Bernoulli trial with per-second rate `p_sec` over `dt_sec`
    pub fn event_fires(&mut self, p_sec: f64, dt_sec: f64) -> bool {
        let p_tick = per_tick_probability(p_sec, dt_sec);
        self.unit() < p_tick
    }
}

/// `p_tick = 1 - (1 - p_sec)^dt`
pub fn per_tick_probability(p_sec: f64, dt_sec: f64) -> f64 {
    let p_sec = p_sec.clamp(0.0, 1.0);
    1.0 - (1.0 - p_sec).powf(dt_sec.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_starts_at_zero() {
        let mut clock = SimClock::new(100);
        assert_eq!(clock.advance(), 0);
        assert_eq!(clock.advance(), 100);
        assert_eq!(clock.advance(), 200);
        assert_eq!(clock.ticks(), 3);
    }

    #[test]
    fn test_clock_zero_interval_clamped() {
        let mut clock = SimClock::new(0);
        assert_eq!(clock.interval_ms(), 1);
        clock.advance();
        assert_eq!(clock.advance(), 1);
    }

    #[test]
    fn test_seed_is_stable() {
        assert_eq!(seed_for_subject("001"), seed_for_subject("001"));
        assert_ne!(seed_for_subject("001"), seed_for_subject("002"));
    }

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = SessionRng::for_subject("patient-a");
        let mut b = SessionRng::for_subject("patient-a");
        for _ in 0..100 {
            assert_eq!(a.gaussian(0.0, 6.0).to_bits(), b.gaussian(0.0, 6.0).to_bits());
            assert_eq!(a.unit().to_bits(), b.unit().to_bits());
        }
    }

    #[test]
    fn test_per_tick_probability() {
        assert_eq!(per_tick_probability(0.0, 0.1), 0.0);
        assert!((per_tick_probability(1.0, 0.1) - 1.0).abs() < 1e-12);
        // One full second reproduces the per-second rate
        assert!((per_tick_probability(0.015, 1.0) - 0.015).abs() < 1e-12);
        // Shorter ticks have smaller probabilities
        assert!(per_tick_probability(0.015, 0.1) < 0.015);
    }

    #[test]
    fn test_gaussian_degenerate_std() {
        let mut rng = SessionRng::from_seed(7);
        assert_eq!(rng.gaussian(5.0, 0.0), 5.0);
        assert_eq!(rng.gaussian(5.0, f64::NAN), 5.0);
    }

    #[test]
    fn test_uniform_bounds() {
        let mut rng = SessionRng::from_seed(11);
        for _ in 0..1000 {
            let v = rng.uniform(10.0, 25.0);
            assert!((10.0..=25.0).contains(&v));
            let d = rng.range_u64(15_000, 30_000);
            assert!((15_000..=30_000).contains(&d));
        }
        assert_eq!(rng.uniform(3.0, 3.0), 3.0);
    }
}
