//! Medications that modulate the simulated signal
//!
//! Effects are applied in enum order (tocolytic, magnesium, oxytocin), which is
//! also the iteration order of [`MedicationSet`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MedicationError {
    #[error("Unknown medication: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Medication {
    /// Beta-agonist tocolytic (hexoprenaline, "ginipral")
    Tocolytic,
    /// Magnesium sulfate
    Magnesium,
    /// Oxytocic
    Oxytocin,
}

impl Medication {
    pub fn as_str(&self) -> &'static str {
        match self {
            Medication::Tocolytic => "tocolytic",
            Medication::Magnesium => "magnesium",
            Medication::Oxytocin => "oxytocin",
        }
    }
}

impl std::fmt::Display for Medication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Medication {
    type Err = MedicationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        match key.as_str() {
            "tocolytic" | "ginipral" | "hexoprenaline" | "гинипрал" | "гексапреналин" => {
                Ok(Medication::Tocolytic)
            }
            "magnesium" | "magnesium sulfate" | "magnesia" | "магнезия"
            | "сернокислая магнезия" => Ok(Medication::Magnesium),
            "oxytocin" | "oxytocic" | "окситоцин" => Ok(Medication::Oxytocin),
            _ => Err(MedicationError::Unknown(s.trim().to_string())),
        }
    }
}

/// Ordered set of active medications
pub type MedicationSet = BTreeSet<Medication>;

/// Strict parse: any unknown name rejects the whole list
pub fn parse_medications<S: AsRef<str>>(names: &[S]) -> Result<MedicationSet, MedicationError> {
    names
        .iter()
        .map(|n| n.as_ref())
        .filter(|n| !n.trim().is_empty())
        .map(Medication::from_str)
        .collect()
}

/// Lenient parse: unknown names are dropped with a warning
pub fn normalize_medications<S: AsRef<str>>(names: &[S]) -> MedicationSet {
    let mut set = MedicationSet::new();
    for name in names.iter().map(|n| n.as_ref()) {
        if name.trim().is_empty() {
            continue;
        }
        match Medication::from_str(name) {
            Ok(med) => {
                set.insert(med);
            }
            Err(e) => warn!("Ignoring medication: {}", e),
        }
    }
    set
}

/// Subject-to-medication lookup supplied by the persistence collaborator
#[async_trait]
pub trait MedicationLookup: Send + Sync {
    /// Known medications for a subject, `None` when the subject is unknown
    async fn medications_for(&self, subject_id: &str) -> anyhow::Result<Option<MedicationSet>>;
}

/// Lookup backed by an in-process map of stored medication names.
/// Names are normalized on read, so stale or unknown entries are dropped.
#[derive(Debug, Default)]
pub struct InMemoryMedicationStore {
    entries: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryMedicationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert<S: AsRef<str>>(&self, subject_id: &str, names: &[S]) {
        let names = names.iter().map(|n| n.as_ref().to_string()).collect();
        self.entries
            .write()
            .await
            .insert(subject_id.to_string(), names);
    }
}

#[async_trait]
impl MedicationLookup for InMemoryMedicationStore {
    async fn medications_for(&self, subject_id: &str) -> anyhow::Result<Option<MedicationSet>> {
        let entries = self.entries.read().await;
        Ok(entries.get(subject_id).map(|names| normalize_medications(names.as_slice())))
    }
}
