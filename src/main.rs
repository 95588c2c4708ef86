use anyhow::{Context, Result};
use clap::Parser;
use futures_util::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use ctg_monitor_lib::assessment::AlertSeverity;
use ctg_monitor_lib::config::EngineConfig;
use ctg_monitor_lib::inference::InferenceEngine;
use ctg_monitor_lib::logging::{init_logging, LogOptions};
use ctg_monitor_lib::medication::parse_medications;
use ctg_monitor_lib::registry::SessionRegistry;

/// Headless CTG monitor: simulates subjects and streams NDJSON records to stdout
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a JSON config file (defaults to ~/.ctgmonitor/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subject to monitor; repeat for several concurrent sessions
    #[arg(short, long = "subject", default_value = "subject-001")]
    subjects: Vec<String>,

    /// Stop after this many seconds (runs until Ctrl+C otherwise)
    #[arg(short, long)]
    duration_sec: Option<u64>,

    /// Tick interval override (ms)
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Directory holding the classifier and forecast artifacts
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Active medications for every subject (comma-separated)
    #[arg(short, long = "medication", value_delimiter = ',')]
    medications: Vec<String>,

    /// Print model diagnostics as JSON and exit
    #[arg(long)]
    diagnostics: bool,

    /// Write the effective config to the default location and exit
    #[arg(long)]
    init_config: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// JSON log lines on stderr
    #[arg(long)]
    log_json: bool,

    /// Also write daily-rotated JSON logs here
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&LogOptions {
        verbose: args.verbose,
        json: args.log_json,
        log_dir: args.log_dir.clone(),
    })?;

    let mut config = match &args.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load_or_default(),
    };
    if let Some(tick_ms) = args.tick_ms {
        config.scheduler.tick_interval_ms = tick_ms;
    }
    if let Some(dir) = &args.model_dir {
        config.models.model_dir = Some(dir.clone());
    }
    config.validate()?;

    if args.init_config {
        let path = EngineConfig::config_path()?;
        config.save_to(&path)?;
        info!("Config written to {:?}", path);
        return Ok(());
    }

    let engine = Arc::new(InferenceEngine::load(&config.models));

    if args.diagnostics {
        let diag = serde_json::to_string_pretty(&engine.diagnostics())?;
        println!("{}", diag);
        return Ok(());
    }

    let initial = if args.medications.is_empty() {
        None
    } else {
        Some(parse_medications(&args.medications).context("Invalid --medication")?)
    };

    let registry = Arc::new(SessionRegistry::new(config, engine));
    info!(
        "CTG monitor starting ({} subjects, backend {:?})",
        args.subjects.len(),
        registry.diagnostics().active_backend
    );

    let mut writers = Vec::with_capacity(args.subjects.len());
    for subject in &args.subjects {
        let handle = registry
            .get_or_create_session(subject, initial.clone())
            .await
            .with_context(|| format!("Failed to start session for {}", subject))?;
        let stream = handle.stream();
        writers.push(tokio::spawn(async move {
            tokio::pin!(stream);
            while let Some(record) = stream.next().await {
                let line = match record.to_ndjson_line() {
                    Ok(line) => line,
                    Err(e) => {
                        error!("Failed to serialize record: {}", e);
                        continue;
                    }
                };
                let written = {
                    let mut out = std::io::stdout().lock();
                    writeln!(out, "{}", line).is_ok()
                };
                if !written {
                    // Downstream closed the pipe
                    break;
                }
            }
        }));
    }

    match args.duration_sec {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    info!("Duration of {}s elapsed", secs);
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                }
            }
        }
        None => {
            info!("Running until Ctrl+C");
            tokio::signal::ctrl_c().await.ok();
        }
    }

    for subject in &args.subjects {
        if let Ok(alerts) = registry.alerts(subject, None).await {
            let critical = alerts
                .iter()
                .filter(|a| a.severity == AlertSeverity::Critical)
                .count();
            info!(
                "Subject {}: {} retained alerts ({} critical)",
                subject,
                alerts.len(),
                critical
            );
        }
    }

    registry.shutdown().await;
    for writer in writers {
        if let Err(e) = writer.await {
            warn!("Output task ended abnormally: {}", e);
        }
    }
    info!("CTG monitor stopped");
    Ok(())
}
