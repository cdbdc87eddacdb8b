//! autoforge daemon — runs the background scheduler loops over the task
//! store and the self-modification pipeline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use af_core::config::Config;
use af_core::notify::LogNotifier;
use af_core::store::TaskStore;
use af_daemon::checkin::CheckinMonitor;
use af_daemon::daemon::{Daemon, DaemonIntervals};
use af_evolve::pipeline::ModificationPipeline;
use af_evolve::sandbox::SandboxRunner;
use af_evolve::vcs::GitCommitter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.general.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(version = env!("CARGO_PKG_VERSION"), "autoforge daemon starting");

    let data_dir = Config::data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let notifier = Arc::new(LogNotifier);
    let store = Arc::new(TaskStore::open(
        config.store.resolved_path(),
        config.store.archive_limit,
        notifier.clone(),
    ));

    // Work that was in flight when the previous process died must not be
    // silently resumed.
    let interrupted = store
        .fail_interrupted()
        .context("failed to sweep interrupted tasks")?;
    if !interrupted.is_empty() {
        info!(count = interrupted.len(), "archived interrupted tasks from previous run");
    }

    let workspace_root = config
        .general
        .workspace_root
        .clone()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| ".".into()));
    info!(workspace_root = %workspace_root.display(), "self-modification pipeline rooted");

    let sandbox = SandboxRunner::new(config.sandbox.interpreter.clone())
        .with_timeout(Duration::from_secs(config.sandbox.timeout_secs));
    let committer = GitCommitter::new(config.vcs.binary.clone());
    let pipeline = Arc::new(ModificationPipeline::new(
        workspace_root,
        config.sandbox.source_ext.clone(),
        Arc::new(sandbox),
        Arc::new(committer),
    ));

    let checkin = Arc::new(CheckinMonitor::new(
        Duration::from_secs(config.checkin.threshold_secs),
        Duration::from_secs(config.checkin.cooldown_secs),
    ));

    let intervals = DaemonIntervals::from_config(&config);
    let grace = Duration::from_secs(config.scheduler.stop_grace_secs);
    let daemon = Arc::new(
        Daemon::new(store, pipeline, intervals)
            .with_notifier(notifier)
            .with_checkin(checkin),
    );

    let handle = daemon.spawn();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("ctrl-c received, stopping");
    // Cooperative stop: in-flight work gets a bounded grace period before the
    // loop is force-cancelled.
    daemon.stop(handle, grace).await;

    info!("autoforge daemon stopped");
    Ok(())
}
