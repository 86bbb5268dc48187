//! Execution engine scheduler
//!
//! Runs the execution worker and the risk monitor on fixed intervals and
//! drains the notification channel until interrupted.

use anyhow::Context;
use execution_engine::{
    ChannelNotifier, EngineArgs, EngineContext, ExecutionWorker, Notification, RiskMonitor, StoredQuotes,
};
use persistence::{Database, DatabaseConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = EngineArgs::from_env();
    info!(?args, "Starting execution engine");

    let db = Database::open(DatabaseConfig {
        lock_wait: args.lock_wait,
        journal_path: args.journal_path.clone(),
    })
    .context("failed to open store")?;

    let (notifier, rx) = ChannelNotifier::new();
    let quotes = Arc::new(StoredQuotes::new(db.clone()));
    let ctx = Arc::new(EngineContext::new(db, quotes, Arc::new(notifier)));

    let worker = Arc::new(ExecutionWorker::new(ctx.clone(), args.worker_config()));
    let monitor = RiskMonitor::new(ctx.clone(), args.monitor_config());

    let notifications = tokio::spawn(drain_notifications(rx));
    let execution = tokio::spawn(run_execution(worker, args.exec_interval, args.workers));
    let risk = tokio::spawn(run_risk(monitor, args.risk_interval));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    execution.abort();
    risk.abort();
    notifications.abort();
    Ok(())
}

async fn run_execution(worker: Arc<ExecutionWorker>, every: Duration, workers: usize) {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tick.tick().await;
        let runs: Vec<_> = (0..workers)
            .map(|_| {
                let worker = Arc::clone(&worker);
                tokio::task::spawn_blocking(move || worker.process_batch())
            })
            .collect();
        for run in runs {
            if let Err(e) = run.await {
                error!(error = %e, "Execution worker task failed");
            }
        }
    }
}

async fn run_risk(monitor: RiskMonitor, every: Duration) {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tick.tick().await;
        let sweep = monitor.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || sweep.run_sweep()).await {
            error!(error = %e, "Risk sweep task failed");
        }
    }
}

async fn drain_notifications(mut rx: mpsc::UnboundedReceiver<Notification>) {
    while let Some(notification) = rx.recv().await {
        match serde_json::to_string(&notification) {
            Ok(payload) => info!(target: "notifications", %payload, "Notification"),
            Err(e) => error!(error = %e, "Failed to encode notification"),
        }
    }
}
