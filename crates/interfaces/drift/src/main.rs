use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use drift_config::{Mode, ProcessConfig};
use drift_engine::{
    EngineContext, EngineHooks, Notifier, Severity, SyncConfig, SyncEngine, SyncEvent,
};
use drift_infra::SyncPools;
use drift_persistence::FileSettingsStore;
use drift_server::ReceiverState;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "drift", version, about = "Continuous directory synchronizer")]
struct Cli {
    /// Override MODE from the environment (sender or receiver).
    #[arg(long)]
    mode: Option<String>,
    /// Data root served in receiver mode.
    #[arg(long, default_value = "/data")]
    data_root: String,
    /// Listen address in receiver mode.
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = drift_config::load_from_env().context("loading configuration")?;
    match cli.mode.as_deref() {
        Some("sender") => config.mode = Mode::Sender,
        Some("receiver") => config.mode = Mode::Receiver,
        Some(other) => anyhow::bail!("unknown --mode {other}, expected sender or receiver"),
        None => {}
    }

    let pools = SyncPools::single();
    match config.mode {
        Mode::Receiver => run_receiver(&cli, pools).await,
        Mode::Sender => run_sender(config, pools).await,
    }
}

async fn run_receiver(cli: &Cli, pools: Arc<SyncPools>) -> anyhow::Result<()> {
    let state = ReceiverState::new(cli.data_root.clone(), pools);
    let listener = tokio::net::TcpListener::bind(&cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    drift_server::serve(state, listener).await?;
    Ok(())
}

async fn run_sender(config: ProcessConfig, pools: Arc<SyncPools>) -> anyhow::Result<()> {
    let store = Arc::new(
        FileSettingsStore::open(&config.config_dir)
            .with_context(|| format!("opening settings store in {}", config.config_dir))?,
    );

    let mut engines = Vec::new();
    for pair in &config.engines {
        // A target URI that names this host's own identity syncs straight
        // into the local data path instead of bouncing through rsync.
        let target = match (&config.dest_host, &config.dest_module) {
            (Some(host), Some(module)) => {
                drift_core::target::resolve_target_path(&pair.target, host, module)
                    .inspect(|local| {
                        info!(engine = pair.id, target = %local, "target resolved to local path")
                    })
                    .unwrap_or_else(|| pair.target.clone())
            }
            _ => pair.target.clone(),
        };

        let mut engine_config = SyncConfig::new(pair.id, pair.source.clone(), target);
        engine_config.rule = pair.rule;
        engine_config.auto_approve_deletions = pair.auto_approve;
        engine_config.bandwidth_limit = config.bandwidth_limit;
        engine_config.poll_interval = config.poll_interval;
        if let Some(watch_interval) = config.watch_interval {
            engine_config.watch_interval = watch_interval;
        }

        let engine = SyncEngine::new(
            engine_config,
            EngineContext {
                pools: pools.clone(),
                store: store.clone(),
                cache_dir: config.config_dir.clone(),
                hooks: Arc::new(LogHooks),
                notifier: Arc::new(LogNotifier),
                dest_host: config.dest_host.clone(),
                rsync_password: config.rsync_password.clone(),
                receiver_port: 8080,
            },
        )
        .with_context(|| format!("building engine {}", pair.id))?;
        engine.clone().start();
        engines.push(engine);
    }

    if engines.is_empty() {
        warn!("no SYNC_<N>_SOURCE/TARGET pairs configured; nothing to do");
        return Ok(());
    }
    info!(engines = engines.len(), "sender running");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    for engine in &engines {
        engine.stop();
    }
    Ok(())
}

/// Default hooks: everything lands in the process log.
struct LogHooks;

impl EngineHooks for LogHooks {
    fn on_event(&self, event: &SyncEvent) {
        info!(
            engine = event.engine_id,
            action = %event.action,
            path = %event.path,
            size = event.size,
            "sync event"
        );
    }

    fn on_error(&self, path: &str, message: &str) {
        warn!(path, message, "sync error");
    }
}

struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Info => info!("{message}"),
            Severity::Warning => warn!("{message}"),
            Severity::Error => error!("{message}"),
        }
    }
}
