//! healthmon - local host telemetry agent
//!
//! Samples CPU, memory, disk, network and process usage, appends each
//! sample to a CSV log, alerts on threshold breaches and keeps an HTML
//! snapshot current. Runs a single cycle (`once`, for cron or systemd
//! timers) or loops on a fixed interval (`run`).

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use healthmon_lib::alert::{
    AlertDispatcher, AlertLogSink, AlertSink, AlertStateStore, ConsoleSink, EmailSink,
};
use healthmon_lib::collector::HostCollector;
use healthmon_lib::store::{CsvMetricLog, MetricStore};
use healthmon_lib::{Monitor, SnapshotRenderer, ThresholdPolicy};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod lock;

use config::AgentConfig;
use lock::{RunLock, REFRESH_EVERY};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Local host telemetry agent
#[derive(Debug, Parser)]
#[command(name = "healthmon")]
#[command(author, version, about = "Local host telemetry agent with threshold alerting", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, short, env = "HEALTHMON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "json")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Human-readable text
    Text,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a single cycle and exit
    Once,

    /// Run cycles on a fixed interval until interrupted
    Run {
        /// Override the configured interval
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = AgentConfig::load(cli.config.as_deref())?;
    if let Commands::Run {
        interval_secs: Some(secs),
    } = cli.command
    {
        config.interval_secs = secs;
        config.validate()?;
    }
    info!(host = %config.host_name, interval_secs = config.interval_secs, "Agent configured");

    match cli.command {
        Commands::Once => run_once(&config).await,
        Commands::Run { .. } => run_loop(&config).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

async fn run_once(config: &AgentConfig) -> Result<()> {
    let lock_path = config.paths.run_lock();
    let Some(_lock) = RunLock::acquire(&lock_path)? else {
        info!(path = %lock_path.display(), "Another invocation holds the run lock, exiting");
        return Ok(());
    };

    let mut monitor = build_monitor(config).await?;
    monitor.logger().log_startup(AGENT_VERSION, "once");

    if monitor.run_cycle().await.is_none() {
        anyhow::bail!("Monitoring cycle failed");
    }

    monitor.logger().log_shutdown("single cycle complete");
    Ok(())
}

async fn run_loop(config: &AgentConfig) -> Result<()> {
    let lock_path = config.paths.run_lock();
    let Some(lock) = RunLock::acquire(&lock_path)? else {
        anyhow::bail!(
            "Another healthmon process holds {}, refusing to start",
            lock_path.display()
        );
    };

    let mut monitor = build_monitor(config).await?;
    monitor.logger().log_startup(AGENT_VERSION, "run");

    let lock = Arc::new(lock);
    let heartbeat = tokio::spawn(refresh_lock(Arc::clone(&lock)));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        let reason = wait_for_signal().await;
        info!(signal = reason, "Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let cycles = monitor.run(config.interval(), shutdown_rx).await;

    heartbeat.abort();
    let _ = heartbeat.await;
    drop(lock);

    monitor
        .logger()
        .log_shutdown(&format!("signal received after {} cycles", cycles));
    Ok(())
}

/// Keep a long-lived lock fresh so single-shot runs never reclaim it
async fn refresh_lock(lock: Arc<RunLock>) {
    let mut ticker = tokio::time::interval(REFRESH_EVERY);
    loop {
        ticker.tick().await;
        if let Err(e) = lock.refresh() {
            warn!(path = %lock.path().display(), error = %e, "Failed to refresh run lock");
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = term.recv() => "SIGTERM",
        },
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}

/// Wire every component from configuration
async fn build_monitor(config: &AgentConfig) -> Result<Monitor> {
    let store = MetricStore::new(
        Box::new(CsvMetricLog::new(&config.paths.metric_log)),
        config.buffer_config(),
    );

    let dispatcher = AlertDispatcher::new(build_sinks(config))
        .with_history_len(config.alert_history)
        .with_state_store(AlertStateStore::new(&config.paths.alert_state));
    info!(sinks = ?dispatcher.sink_names(), "Alert sinks enabled");

    let renderer = SnapshotRenderer::new(&config.paths.snapshot, config.host_name.clone())?;

    Monitor::builder()
        .collector(Box::new(HostCollector::new(config.collector_config())))
        .policy(ThresholdPolicy::new(config.thresholds))
        .store(store)
        .dispatcher(dispatcher)
        .renderer(renderer)
        .host_name(config.host_name.clone())
        .metrics_textfile(config.paths.metrics_textfile.clone())
        .build()
        .await
}

/// Enabled sinks; a misconfigured email sink is skipped with a warning
fn build_sinks(config: &AgentConfig) -> Vec<Box<dyn AlertSink>> {
    let mut sinks: Vec<Box<dyn AlertSink>> = Vec::new();

    if config.sinks.console {
        sinks.push(Box::new(ConsoleSink::stdout()));
    }
    if config.sinks.alert_log {
        sinks.push(Box::new(AlertLogSink::new(&config.paths.alert_log)));
    }
    if config.sinks.email {
        match config
            .email_config()
            .and_then(|email| EmailSink::smtp(&email))
        {
            Ok(sink) => sinks.push(Box::new(sink)),
            Err(e) => warn!(error = %e, "Email alerts disabled"),
        }
    }

    sinks
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_once_defaults() {
        let cli = Cli::try_parse_from(["healthmon", "once"]).unwrap();
        assert!(matches!(cli.command, Commands::Once));
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn test_parse_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "healthmon",
            "--config",
            "/etc/healthmon.toml",
            "--log-format",
            "text",
            "run",
            "--interval-secs",
            "15",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/etc/healthmon.toml")));
        assert_eq!(cli.log_format, LogFormat::Text);
        assert!(matches!(
            cli.command,
            Commands::Run {
                interval_secs: Some(15)
            }
        ));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["healthmon"]).is_err());
    }

    #[test]
    fn test_email_sink_skipped_when_unconfigured() {
        let mut config = AgentConfig::default();
        config.sinks.email = true;

        let sinks = build_sinks(&config);
        let names: Vec<&str> = sinks.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["console", "alert_log"]);
    }
}
