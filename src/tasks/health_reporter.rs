use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::config::HealthConfig;
use crate::dispatch::InboundEventRouter;
use crate::status::StatusPublisher;

/// Background task publishing periodic service-health snapshots
pub struct HealthReporter {
    config: HealthConfig,
    router: Arc<InboundEventRouter>,
    status: Arc<StatusPublisher>,
    started_at: Instant,
    shutdown: broadcast::Receiver<()>,
}

impl HealthReporter {
    pub fn new(
        config: HealthConfig,
        router: Arc<InboundEventRouter>,
        status: Arc<StatusPublisher>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            router,
            status,
            started_at: Instant::now(),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        if self.config.interval_secs == 0 {
            tracing::info!("Health reporter disabled");
            return;
        }

        let mut timer = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_secs = self.config.interval_secs,
            service = %self.status.service(),
            "Health reporter started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Health reporter received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.report_once().await;
                }
            }
        }

        tracing::info!("Health reporter stopped");
    }

    pub async fn report_once(&self) {
        let snapshot = self.snapshot();
        tracing::debug!(snapshot = ?snapshot, "Publishing service health snapshot");
        self.status.service_health(snapshot).await;
    }

    fn snapshot(&self) -> Map<String, Value> {
        let mut fields = match serde_json::to_value(self.router.stats().snapshot()) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        fields.insert("unitsInFlight".into(), self.router.in_flight().into());
        fields.insert(
            "availablePermits".into(),
            self.router.available_permits().into(),
        );
        fields.insert(
            "uptimeSeconds".into(),
            self.started_at.elapsed().as_secs().into(),
        );
        fields
    }
}
