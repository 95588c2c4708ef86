//! Real-time CTG simulation and streaming inference.
//!
//! A [`SessionRegistry`] owns one ticking session per subject. Every tick
//! produces a simulated fetal-heart-rate / uterine-contraction sample tagged by
//! the rule engine, plus the latest classifier and forecast snapshot.

pub mod assessment;
pub mod clock;
pub mod config;
pub mod features;
pub mod history;
pub mod inference;
pub mod logging;
pub mod medication;
pub mod models;
pub mod registry;
pub mod rules;
pub mod scheduler;
pub mod session;
pub mod simulator;

#[cfg(test)]
mod pipeline_tests;

pub use assessment::{AlertSeverity, ClinicalAlert, ClinicalLog, PredictionEntry, SessionStats};
pub use config::EngineConfig;
pub use inference::{InferenceEngine, InferenceSnapshot};
pub use medication::{Medication, MedicationSet};
pub use registry::{RegistryError, SessionRegistry};
pub use scheduler::SessionHandle;
pub use session::{CombinedRecord, MonitorSession};
pub use simulator::Sample;
