use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Parameters of the synthetic FHR/UC generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub baseline_bpm: u32,
    pub variability_bpm: f64,
    pub accel_prob_per_sec: f64,
    pub decel_prob_per_sec: f64,
    pub uc_base: f64,
    pub uc_peak: f64,
    pub uc_period_sec: f64,
    pub uc_noise_std: f64,
    /// EMA factor for the heart-rate trace, (0, 1]; smaller is smoother
    pub smoothing_alpha: f64,
    pub drift_amplitude_bpm: f64,
    pub drift_period_ms: f64,
    /// Forced pathology sequence during the first 10 s of every session
    pub warmup_enabled: bool,
    /// Fraction of the gap to baseline variability recovered per tick
    pub variability_recovery_per_tick: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            baseline_bpm: 140,
            variability_bpm: 6.0,
            accel_prob_per_sec: 0.015,
            decel_prob_per_sec: 0.012,
            uc_base: 10.0,
            uc_peak: 60.0,
            uc_period_sec: 120.0,
            uc_noise_std: 1.0,
            smoothing_alpha: 0.15,
            drift_amplitude_bpm: 2.0,
            drift_period_ms: 30_000.0,
            warmup_enabled: true,
            variability_recovery_per_tick: 0.01,
        }
    }
}

/// Retention of the rolling buffers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Rule-engine history (FHR, UC, contraction peaks)
    pub history_window_sec: u64,
    /// Feature window context length for inference
    pub context_window_sec: u64,
    /// Alerts kept per session until cleared
    pub alert_log_capacity: usize,
    /// Recent classifications kept per session
    pub prediction_history_capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            history_window_sec: 60,
            context_window_sec: 300,
            alert_log_capacity: 100,
            prediction_history_capacity: 1_000,
        }
    }
}

/// Thresholds used by the pathology rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleThresholds {
    pub bradycardia_bpm: u32,
    pub tachycardia_bpm: u32,
    pub min_variability_std: f64,
    pub min_variability_points: usize,
    pub contraction_peak_threshold: f64,
    pub min_peak_spacing_ms: u64,
    pub max_peaks_in_window: usize,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            bradycardia_bpm: 110,
            tachycardia_bpm: 160,
            min_variability_std: 3.0,
            min_variability_points: 50,
            contraction_peak_threshold: 55.0,
            min_peak_spacing_ms: 45_000,
            max_peaks_in_window: 5,
        }
    }
}

/// Tick and inference cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
    /// Upper bound on classifier + forecast invocations per second
    pub inference_max_hz: f64,
    /// Records buffered per consumer before it starts lagging
    pub broadcast_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            inference_max_hz: 2.0,
            broadcast_capacity: 256,
        }
    }
}

impl SchedulerConfig {
    /// Minimum simulated time between two inference runs
    pub fn inference_interval_ms(&self) -> u64 {
        if self.inference_max_hz.is_nan() || self.inference_max_hz <= 0.0 {
            return u64::MAX;
        }
        (1000.0 / self.inference_max_hz).round() as u64
    }
}

/// Where the pre-trained artifacts live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_dir: Option<PathBuf>,
    pub model_name: String,
    pub forecast_horizons: Vec<u32>,
    /// Number of threads for ONNX inference
    pub n_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_dir: None,
            model_name: "best_fetal_model".to_string(),
            forecast_horizons: vec![10, 30, 60],
            n_threads: 2,
        }
    }
}

impl ModelConfig {
    /// Resolve the artifact directory, falling back to the default models dir
    pub fn resolve_model_dir(&self) -> Result<PathBuf> {
        match self.model_dir {
            Some(ref dir) => Ok(dir.clone()),
            None => EngineConfig::models_dir(),
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub schema_version: u32,
    pub simulator: SimulatorConfig,
    pub history: HistoryConfig,
    pub rules: RuleThresholds,
    pub scheduler: SchedulerConfig,
    pub models: ModelConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            simulator: SimulatorConfig::default(),
            history: HistoryConfig::default(),
            rules: RuleThresholds::default(),
            scheduler: SchedulerConfig::default(),
            models: ModelConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Get the default config directory
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".ctgmonitor"))
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Get the default models directory
    pub fn models_dir() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("models"))
    }

    /// Load config from the default location or return default
    pub fn load_or_default() -> Self {
        match Self::config_path().and_then(|p| Self::load_from(&p)) {
            Ok(config) => config,
            Err(e) => {
                debug!("Failed to load config, using default: {}", e);
                Self::default()
            }
        }
    }

    /// Load config from a file; a missing file yields the default config
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {:?}", path))?;
            let config: EngineConfig = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config {:?}", path))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a file
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let sim = &self.simulator;
        anyhow::ensure!(
            sim.smoothing_alpha > 0.0 && sim.smoothing_alpha <= 1.0,
            "simulator.smoothing_alpha must be in (0, 1]"
        );
        anyhow::ensure!(sim.uc_period_sec > 0.0, "simulator.uc_period_sec must be > 0");
        anyhow::ensure!(sim.drift_period_ms > 0.0, "simulator.drift_period_ms must be > 0");
        anyhow::ensure!(
            (0.0..=1.0).contains(&sim.accel_prob_per_sec)
                && (0.0..=1.0).contains(&sim.decel_prob_per_sec),
            "event probabilities must be in [0, 1]"
        );
        anyhow::ensure!(sim.variability_bpm >= 0.0, "simulator.variability_bpm must be >= 0");
        anyhow::ensure!(
            self.history.history_window_sec > 0 && self.history.context_window_sec > 0,
            "history windows must be > 0"
        );
        anyhow::ensure!(
            self.scheduler.tick_interval_ms > 0,
            "scheduler.tick_interval_ms must be > 0"
        );
        anyhow::ensure!(
            self.scheduler.inference_max_hz.is_finite() && self.scheduler.inference_max_hz >= 0.0,
            "scheduler.inference_max_hz must be finite and >= 0"
        );
        anyhow::ensure!(
            self.scheduler.broadcast_capacity > 0,
            "scheduler.broadcast_capacity must be > 0"
        );
        anyhow::ensure!(self.models.n_threads > 0, "models.n_threads must be > 0");
        Ok(())
    }
}
