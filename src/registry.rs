//! Subject → session registry.
//!
//! Lifecycle per subject: absent → active → retired. The map is the only
//! state shared across sessions; create-if-absent happens under its lock.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::assessment::{AlertSeverity, ClinicalAlert, PredictionEntry, SessionStats};
use crate::config::EngineConfig;
use crate::inference::InferenceEngine;
use crate::medication::{parse_medications, MedicationError, MedicationLookup, MedicationSet};
use crate::models::Diagnostics;
use crate::scheduler::SessionHandle;
use crate::session::{CombinedRecord, MonitorSession};

/// Longest accepted subject identifier
pub const MAX_SUBJECT_ID_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session stopped: {0}")]
    SessionStopped(String),

    #[error("Invalid subject id: {0:?}")]
    InvalidSubject(String),

    #[error(transparent)]
    Medication(#[from] MedicationError),
}

/// Reject empty, oversized or control-character identifiers
pub fn validate_subject_id(subject_id: &str) -> Result<(), RegistryError> {
    let trimmed = subject_id.trim();
    if trimmed.is_empty()
        || trimmed.len() != subject_id.len()
        || subject_id.len() > MAX_SUBJECT_ID_LEN
        || subject_id.chars().any(char::is_control)
    {
        return Err(RegistryError::InvalidSubject(subject_id.to_string()));
    }
    Ok(())
}

pub struct SessionRegistry {
    config: EngineConfig,
    engine: Arc<InferenceEngine>,
    lookup: Option<Arc<dyn MedicationLookup>>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
    /// Last known medication set per subject, from lookups and updates
    medication_cache: RwLock<HashMap<String, MedicationSet>>,
}

impl SessionRegistry {
    pub fn new(config: EngineConfig, engine: Arc<InferenceEngine>) -> Self {
        Self {
            config,
            engine,
            lookup: None,
            sessions: Mutex::new(HashMap::new()),
            medication_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Consult `lookup` for the medications of subjects seen for the first time
    pub fn with_lookup(mut self, lookup: Arc<dyn MedicationLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Return the active session for `subject_id`, creating it if needed.
    ///
    /// `initial_medications` only applies when a session is created; otherwise
    /// the cached or looked-up set is used.
    pub async fn get_or_create_session(
        &self,
        subject_id: &str,
        initial_medications: Option<MedicationSet>,
    ) -> Result<SessionHandle, RegistryError> {
        validate_subject_id(subject_id)?;

        if let Some(handle) = self.active_handle(subject_id).await {
            return Ok(handle);
        }

        // Resolve outside the map lock; the lookup may do IO
        let medications = match initial_medications {
            Some(set) => {
                self.remember_medications(subject_id, set.clone()).await;
                set
            }
            None => self.known_medications(subject_id).await,
        };

        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(subject_id) {
            if !existing.is_stopped() {
                debug!("Session for {} created concurrently, reusing", subject_id);
                return Ok(existing.clone());
            }
        }

        let session = MonitorSession::new(subject_id, &self.config, self.engine.clone(), medications);
        let handle = SessionHandle::spawn(session, &self.config);
        sessions.insert(subject_id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Handles stopped directly through `SessionHandle::stop` are pruned here
    async fn active_handle(&self, subject_id: &str) -> Option<SessionHandle> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(subject_id) {
            Some(h) if h.is_stopped() => {
                debug!("Pruning stopped session for {}", subject_id);
                sessions.remove(subject_id);
                None
            }
            Some(h) => Some(h.clone()),
            None => None,
        }
    }

    /// Active session or `SessionNotFound`
    pub async fn session(&self, subject_id: &str) -> Result<SessionHandle, RegistryError> {
        self.active_handle(subject_id)
            .await
            .ok_or_else(|| RegistryError::SessionNotFound(subject_id.to_string()))
    }

    async fn known_medications(&self, subject_id: &str) -> MedicationSet {
        if let Some(set) = self.medication_cache.read().await.get(subject_id) {
            return set.clone();
        }
        let Some(lookup) = self.lookup.as_ref() else {
            return MedicationSet::new();
        };
        match lookup.medications_for(subject_id).await {
            Ok(Some(set)) => {
                self.remember_medications(subject_id, set.clone()).await;
                set
            }
            Ok(None) => MedicationSet::new(),
            Err(e) => {
                warn!("Medication lookup failed for {}: {}", subject_id, e);
                MedicationSet::new()
            }
        }
    }

    async fn remember_medications(&self, subject_id: &str, set: MedicationSet) {
        self.medication_cache
            .write()
            .await
            .insert(subject_id.to_string(), set);
    }

    /// Replace a subject's medications. Unknown names reject the whole list.
    /// The set is remembered even when no session is running.
    pub async fn set_medications<S: AsRef<str>>(
        &self,
        subject_id: &str,
        names: &[S],
    ) -> Result<MedicationSet, RegistryError> {
        validate_subject_id(subject_id)?;
        let set = parse_medications(names)?;
        self.remember_medications(subject_id, set.clone()).await;

        if let Some(handle) = self.active_handle(subject_id).await {
            handle.set_medications(set.clone());
        } else {
            debug!("Medications stored for {} with no active session", subject_id);
        }
        Ok(set)
    }

    /// Pull mode: wait for the subject's next record
    pub async fn next_tick(&self, subject_id: &str) -> Result<CombinedRecord, RegistryError> {
        self.session(subject_id).await?.next_record().await
    }

    /// Push mode: a new consumer of the subject's records
    pub async fn subscribe(
        &self,
        subject_id: &str,
    ) -> Result<broadcast::Receiver<CombinedRecord>, RegistryError> {
        Ok(self.session(subject_id).await?.subscribe())
    }

    /// Retire a session. Its buffers are released when the tick task ends.
    pub async fn stop_session(&self, subject_id: &str) -> Result<(), RegistryError> {
        let handle = self.sessions.lock().await.remove(subject_id);
        match handle {
            Some(h) if !h.is_stopped() => {
                h.stop();
                Ok(())
            }
            _ => Err(RegistryError::SessionNotFound(subject_id.to_string())),
        }
    }

    pub async fn stats(&self, subject_id: &str) -> Result<SessionStats, RegistryError> {
        Ok(self.session(subject_id).await?.stats())
    }

    /// Retained alerts of a subject's session, optionally of one severity
    pub async fn alerts(
        &self,
        subject_id: &str,
        severity: Option<AlertSeverity>,
    ) -> Result<Vec<ClinicalAlert>, RegistryError> {
        Ok(self.session(subject_id).await?.alerts(severity))
    }

    pub async fn clear_alerts(&self, subject_id: &str) -> Result<(), RegistryError> {
        self.session(subject_id).await?.clear_alerts();
        Ok(())
    }

    /// Up to `limit` most recent classifications, oldest first
    pub async fn history(
        &self,
        subject_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<PredictionEntry>, RegistryError> {
        Ok(self.session(subject_id).await?.history(limit))
    }

    pub async fn active_subjects(&self) -> Vec<String> {
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, h| !h.is_stopped());
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.engine.diagnostics()
    }

    /// Stop every session and wait for the tick tasks to finish
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = {
            let mut sessions = self.sessions.lock().await;
            info!("Shutting down {} sessions", sessions.len());
            sessions.drain().map(|(_, h)| h).collect()
        };
        for handle in &handles {
            handle.stop();
        }
        for handle in &handles {
            handle.join().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medication::{InMemoryMedicationStore, Medication};
    use std::time::Duration;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(EngineConfig::default(), Arc::new(InferenceEngine::degraded()))
    }

    #[test]
    fn test_subject_validation() {
        assert!(validate_subject_id("patient-001").is_ok());
        assert!(validate_subject_id("").is_err());
        assert!(validate_subject_id("   ").is_err());
        assert!(validate_subject_id(" padded").is_err());
        assert!(validate_subject_id("bad\nid").is_err());
        assert!(validate_subject_id(&"x".repeat(MAX_SUBJECT_ID_LEN + 1)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_or_create_is_idempotent() {
        let registry = registry();
        let a = registry.get_or_create_session("p1", None).await.unwrap();
        let b = registry.get_or_create_session("p1", None).await.unwrap();
        assert_eq!(a.session_id(), b.session_id());
        assert_eq!(registry.active_subjects().await, vec!["p1".to_string()]);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_create_single_session() {
        let registry = Arc::new(registry());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.get_or_create_session("shared", None).await.unwrap().session_id()
            }));
        }
        let mut ids = Vec::new();
        for t in tasks {
            ids.push(t.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_subject_rejected() {
        let registry = registry();
        assert!(matches!(
            registry.get_or_create_session("", None).await,
            Err(RegistryError::InvalidSubject(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_medication_rejected() {
        let registry = registry();
        let _ = registry.get_or_create_session("p1", None).await.unwrap();
        let err = registry
            .set_medications("p1", &["magnesium", "aspirin"])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Medication(_)));
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_medications_reaches_session() {
        let registry = registry();
        let handle = registry.get_or_create_session("p1", None).await.unwrap();
        let set = registry.set_medications("p1", &["ginipral"]).await.unwrap();
        assert!(set.contains(&Medication::Tocolytic));
        assert_eq!(handle.medications(), set);

        // Skip the record that may have been generated before the update
        let _ = registry.next_tick("p1").await.unwrap();
        let record = registry.next_tick("p1").await.unwrap();
        assert!(record.sample.medications.contains(&Medication::Tocolytic));
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_medications_remembered_before_session() {
        let registry = registry();
        registry.set_medications("p2", &["oxytocin"]).await.unwrap();
        let handle = registry.get_or_create_session("p2", None).await.unwrap();
        assert!(handle.medications().contains(&Medication::Oxytocin));
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_applied_on_create() {
        let store = Arc::new(InMemoryMedicationStore::new());
        store.insert("p3", &["Сернокислая магнезия"]).await;
        let registry = registry().with_lookup(store);
        let handle = registry.get_or_create_session("p3", None).await.unwrap();
        assert!(handle.medications().contains(&Medication::Magnesium));
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_then_recreate() {
        let registry = registry();
        let first = registry.get_or_create_session("p1", None).await.unwrap();
        let r1 = first.next_record().await.unwrap();

        registry.stop_session("p1").await.unwrap();
        assert!(first.is_stopped());
        assert!(matches!(
            registry.next_tick("p1").await,
            Err(RegistryError::SessionNotFound(_))
        ));
        assert!(matches!(
            registry.stop_session("p1").await,
            Err(RegistryError::SessionNotFound(_))
        ));

        let second = registry.get_or_create_session("p1", None).await.unwrap();
        assert_ne!(first.session_id(), second.session_id());
        // Same subject, same seed, same first sample
        let r2 = second.next_record().await.unwrap();
        assert_eq!(r1.sample, r2.sample);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_tick_without_consumers() {
        let registry = registry();
        let handle = registry.get_or_create_session("p1", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2_050)).await;
        let latest = handle.latest().unwrap();
        assert_eq!(latest.sample.t_ms, 2_000);
        assert_eq!(registry.stats("p1").await.unwrap().total_inferences, 5);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_directly_stopped_handle_is_pruned() {
        let registry = registry();
        let handle = registry.get_or_create_session("p1", None).await.unwrap();
        handle.stop();

        assert!(registry.active_subjects().await.is_empty());
        assert!(registry.sessions.lock().await.is_empty());
        assert!(matches!(
            registry.stop_session("p1").await,
            Err(RegistryError::SessionNotFound(_))
        ));

        registry.get_or_create_session("p2", None).await.unwrap().stop();
        assert!(matches!(
            registry.stats("p2").await,
            Err(RegistryError::SessionNotFound(_))
        ));
        assert!(registry.sessions.lock().await.is_empty());
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_alert_and_history_queries() {
        let registry = registry();
        registry.get_or_create_session("p1", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2_050)).await;

        let history = registry.history("p1", Some(3)).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].at_ms, 2_000);
        assert_eq!(registry.history("p1", None).await.unwrap().len(), 5);

        // The degraded classifier never alerts
        assert!(registry.alerts("p1", None).await.unwrap().is_empty());
        registry.clear_alerts("p1").await.unwrap();

        assert!(matches!(
            registry.alerts("unknown", None).await,
            Err(RegistryError::SessionNotFound(_))
        ));
        assert!(matches!(
            registry.history("unknown", Some(1)).await,
            Err(RegistryError::SessionNotFound(_))
        ));
        registry.shutdown().await;
    }
}
