//! Graceful shutdown for the dispatch service.
//!
//! 1. Wait for SIGINT / SIGTERM
//! 2. Signal the router and background tasks to stop
//! 3. Wait for the router to drain in-flight units
//! 4. Wait for the remaining tasks

use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::dispatch::DrainReport;

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Upper bound for the router to stop, on top of its own drain timeout
    pub router_timeout: Duration,
    /// Upper bound for the other background tasks
    pub task_timeout: Duration,
}

impl ShutdownConfig {
    pub fn for_drain_timeout(drain_timeout_secs: u64) -> Self {
        Self {
            router_timeout: Duration::from_secs(drain_timeout_secs + 5),
            ..Self::default()
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            router_timeout: Duration::from_secs(35),
            task_timeout: Duration::from_secs(5),
        }
    }
}

/// Resolves once the process receives Ctrl+C or SIGTERM.
pub async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "ctrl_c",
        _ = terminate => "terminate",
    }
}

pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(shutdown_tx: broadcast::Sender<()>, config: ShutdownConfig) -> Self {
        Self {
            shutdown_tx,
            config,
        }
    }

    #[tracing::instrument(name = "graceful_shutdown", skip_all, fields(reason = %reason))]
    pub async fn execute(
        &self,
        reason: &str,
        router: JoinHandle<DrainReport>,
        tasks: Vec<JoinHandle<()>>,
    ) -> ShutdownResult {
        let start = Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!("Starting graceful shutdown - Phase 1: Signaling router and tasks");
        let _ = self.shutdown_tx.send(());

        tracing::info!("Phase 2: Waiting for the router to drain");
        result.router = match timeout(self.config.router_timeout, router).await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Router task ended abnormally");
                None
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.config.router_timeout.as_secs(),
                    "Router did not stop in time"
                );
                None
            }
        };

        tracing::info!(tasks = tasks.len(), "Phase 3: Waiting for background tasks");
        result.tasks_stopped = self.join_tasks(tasks).await;

        result.duration = start.elapsed();
        result.success = result.router.is_some_and(|r| r.abandoned == 0);

        tracing::info!(
            success = result.success,
            tasks_stopped = result.tasks_stopped,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }

    async fn join_tasks(&self, tasks: Vec<JoinHandle<()>>) -> usize {
        let mut pending: FuturesUnordered<_> = tasks.into_iter().collect();
        let mut stopped = 0;

        let join_all = async {
            while let Some(joined) = pending.next().await {
                match joined {
                    Ok(()) => stopped += 1,
                    Err(e) => tracing::warn!(error = %e, "Background task ended abnormally"),
                }
            }
        };

        if timeout(self.config.task_timeout, join_all).await.is_err() {
            tracing::warn!("Background tasks did not stop in time");
        }
        stopped
    }
}

#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// True when the router stopped without abandoning units
    pub success: bool,
    pub router: Option<DrainReport>,
    pub tasks_stopped: usize,
    pub duration: Duration,
}
