//! Logging setup and structured session events
//!
//! Console output goes to stderr so stdout stays a clean NDJSON record stream.
//! With a log directory, a daily-rotated JSON file is written as well.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};
use uuid::Uuid;

use crate::assessment::ClinicalAlert;
use crate::medication::MedicationSet;

/// Keeps the file writer alive until exit so buffered lines are flushed
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub verbose: bool,
    /// JSON console output instead of human-readable lines
    pub json: bool,
    pub log_dir: Option<PathBuf>,
}

/// Install the global subscriber. `RUST_LOG` overrides the default level.
pub fn init_logging(opts: &LogOptions) -> Result<()> {
    let default_level = if opts.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console_layer = if opts.json {
        fmt::layer()
            .json()
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let file_layer = match &opts.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {:?}", dir))?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "ctg-monitor.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            LOG_GUARD.set(guard).ok();
            Some(
                fmt::layer()
                    .json()
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(non_blocking)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    info!(
        event = "logging_initialized",
        log_dir = ?opts.log_dir,
        "Logging initialized"
    );
    Ok(())
}

// ============================================================================
// Session Lifecycle Events
// ============================================================================

pub fn log_session_start(session_id: Uuid, subject_id: &str, medications: &MedicationSet) {
    info!(
        event = "session_start",
        session_id = %session_id,
        subject_id = %subject_id,
        medications = ?medications,
        "Monitoring session started"
    );
}

pub fn log_session_stop(session_id: Uuid, ticks: u64) {
    info!(
        event = "session_stop",
        session_id = %session_id,
        ticks = ticks,
        "Monitoring session stopped"
    );
}

pub fn log_medications_changed(session_id: Uuid, from: &MedicationSet, to: &MedicationSet) {
    info!(
        event = "medications_changed",
        session_id = %session_id,
        from = ?from,
        to = ?to,
        "Active medications replaced"
    );
}

pub fn log_clinical_alert(session_id: Uuid, alert: &ClinicalAlert) {
    warn!(
        event = "clinical_alert",
        session_id = %session_id,
        severity = ?alert.severity,
        confidence = alert.confidence,
        at_ms = alert.at_ms,
        "{}",
        alert.message
    );
}
