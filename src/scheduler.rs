//! Async tick loop for one session and the handle consumers hold.
//!
//! Each session runs in its own tokio task ticking at a fixed interval whether
//! or not anyone is listening. Records fan out over a broadcast channel (each
//! subscriber has its own read position) and the latest one is kept in a
//! watch channel, next to the stats and the clinical log.

use futures_util::stream::{self, Stream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assessment::{AlertSeverity, ClinicalAlert, ClinicalLog, PredictionEntry, SessionStats};
use crate::config::EngineConfig;
use crate::logging;
use crate::medication::MedicationSet;
use crate::registry::RegistryError;
use crate::session::{CombinedRecord, MonitorSession};

/// Cloneable handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    subject_id: String,
    session_id: Uuid,
    /// Never read; only used to mint new subscribers
    records_tap: Arc<broadcast::Receiver<CombinedRecord>>,
    latest_rx: watch::Receiver<Option<CombinedRecord>>,
    stats_rx: watch::Receiver<SessionStats>,
    /// Shared with the tick task, which appends; the handle only reads and clears
    log_tx: Arc<watch::Sender<ClinicalLog>>,
    medications_tx: Arc<watch::Sender<MedicationSet>>,
    stop: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionHandle {
    /// Move the session into its own tick task
    pub fn spawn(session: MonitorSession, config: &EngineConfig) -> Self {
        let subject_id = session.subject_id().to_string();
        let session_id = session.session_id();
        let scheduler = &config.scheduler;

        let (records_tx, records_tap) = broadcast::channel(scheduler.broadcast_capacity.max(1));
        let (latest_tx, latest_rx) = watch::channel(None);
        let (stats_tx, stats_rx) = watch::channel(session.stats().clone());
        let (log_tx, _) = watch::channel(ClinicalLog::new(
            config.history.alert_log_capacity,
            config.history.prediction_history_capacity,
        ));
        let log_tx = Arc::new(log_tx);
        let (medications_tx, medications_rx) = watch::channel(session.medications().clone());
        let stop = Arc::new(AtomicBool::new(false));
        let stop_signal = Arc::new(Notify::new());

        let tick = Duration::from_millis(scheduler.tick_interval_ms.max(1));
        let task = {
            let outputs = TickOutputs {
                records_tx,
                latest_tx,
                stats_tx,
                log_tx: log_tx.clone(),
            };
            let control = TickControl {
                medications_rx,
                stop: stop.clone(),
                stop_signal: stop_signal.clone(),
            };
            tokio::spawn(async move {
                tick_loop(session, tick, outputs, control).await;
            })
        };

        info!(
            "Session {} started for subject {} (tick {} ms)",
            session_id, subject_id, scheduler.tick_interval_ms
        );

        Self {
            subject_id,
            session_id,
            records_tap: Arc::new(records_tap),
            latest_rx,
            stats_rx,
            log_tx,
            medications_tx: Arc::new(medications_tx),
            stop,
            stop_signal,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// New consumer positioned at the next record
    pub fn subscribe(&self) -> broadcast::Receiver<CombinedRecord> {
        self.records_tap.resubscribe()
    }

    /// Record stream that skips over lag and ends when the session stops
    pub fn stream(&self) -> impl Stream<Item = CombinedRecord> + Send + 'static {
        let rx = self.subscribe();
        let session_id = self.session_id;
        stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(record) => return Some((record, rx)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Session {} consumer lagged, skipped {} records", session_id, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }

    /// Wait for the next record
    pub async fn next_record(&self) -> Result<CombinedRecord, RegistryError> {
        if self.is_stopped() {
            return Err(RegistryError::SessionStopped(self.subject_id.clone()));
        }
        let mut rx = self.subscribe();
        loop {
            match rx.recv().await {
                Ok(record) => return Ok(record),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(RegistryError::SessionStopped(self.subject_id.clone()))
                }
            }
        }
    }

    /// Most recently emitted record
    pub fn latest(&self) -> Option<CombinedRecord> {
        self.latest_rx.borrow().clone()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats_rx.borrow().clone()
    }

    /// Retained alerts, oldest first, optionally of one severity only
    pub fn alerts(&self, severity: Option<AlertSeverity>) -> Vec<ClinicalAlert> {
        self.log_tx.borrow().alerts(severity)
    }

    pub fn clear_alerts(&self) {
        self.log_tx.send_modify(|log| log.clear_alerts());
    }

    /// Most recent classifications, oldest first
    pub fn history(&self, limit: Option<usize>) -> Vec<PredictionEntry> {
        self.log_tx.borrow().history(limit)
    }

    /// Receiver notified whenever an inference lands in the clinical log
    pub fn watch_log(&self) -> watch::Receiver<ClinicalLog> {
        self.log_tx.subscribe()
    }

    pub fn medications(&self) -> MedicationSet {
        self.medications_tx.borrow().clone()
    }

    /// Atomically replace the medication set; the next tick picks it up
    pub fn set_medications(&self, medications: MedicationSet) {
        self.medications_tx.send_replace(medications);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Signal the tick loop to finish. It wakes immediately, emits nothing
    /// further and drops its buffers; use [`join`](Self::join) to wait for it.
    pub fn stop(&self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stopping session {} for subject {}", self.session_id, self.subject_id);
        self.stop_signal.notify_one();
    }

    /// Wait until the tick task has exited. Only the first caller waits.
    pub async fn join(&self) {
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Session {} tick task failed: {}", self.session_id, e);
            }
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("subject_id", &self.subject_id)
            .field("session_id", &self.session_id)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

struct TickOutputs {
    records_tx: broadcast::Sender<CombinedRecord>,
    latest_tx: watch::Sender<Option<CombinedRecord>>,
    stats_tx: watch::Sender<SessionStats>,
    log_tx: Arc<watch::Sender<ClinicalLog>>,
}

struct TickControl {
    medications_rx: watch::Receiver<MedicationSet>,
    stop: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
}

async fn tick_loop(
    mut session: MonitorSession,
    tick: Duration,
    outputs: TickOutputs,
    mut control: TickControl,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = control.stop_signal.notified() => break,
            _ = interval.tick() => {}
        }
        if control.stop.load(Ordering::SeqCst) {
            break;
        }

        if control.medications_rx.has_changed().unwrap_or(false) {
            let medications = control.medications_rx.borrow_and_update().clone();
            session.set_medications(medications);
        }

        let record = session.tick();

        // A stop issued while ticking discards this record
        if control.stop.load(Ordering::SeqCst) {
            debug!("Session {} stopped mid-tick, discarding record", session.session_id());
            break;
        }

        let t_ms = record.sample.t_ms;
        let inferred = record.inference.inferred_at_ms == Some(t_ms);
        let failed = record.inference.error.as_ref().map(|e| e.at_ms) == Some(t_ms);
        if inferred || failed {
            outputs.stats_tx.send_replace(session.stats().clone());
        }
        if inferred {
            if let Some(classification) = &record.inference.classification {
                outputs
                    .log_tx
                    .send_modify(|log| log.record(classification, record.alert.as_ref(), t_ms));
            }
        }
        outputs.latest_tx.send_replace(Some(record.clone()));
        // No subscribers is fine; the session keeps ticking
        let _ = outputs.records_tx.send(record);
    }

    logging::log_session_stop(session.session_id(), session.ticks());
}
