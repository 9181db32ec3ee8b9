//! Inbound event router: poll loop feeding a bounded worker pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::timeout;
use tracing::Instrument;

use crate::broker::{BrokerError, EventConsumer, InboundMessage};
use crate::config::{SaturationPolicy, WorkerConfig};
use crate::metrics::PipelineMetrics;
use crate::redis::ExponentialBackoff;
use crate::status::StatusPublisher;

use super::processor::{MessageOutcome, MessageProcessor};
use super::stats::RouterStats;

type MessageKey = (String, String);

/// Result of draining in-flight units at shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub abandoned: usize,
}

/// Removes the message from the in-flight set when the unit ends, even on
/// panic or abort.
struct InFlightGuard {
    in_flight: Arc<DashSet<MessageKey>>,
    key: MessageKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
        PipelineMetrics::unit_finished();
    }
}

/// Counts the units of one polled batch; the last one to finish publishes
/// the batch summary.
struct BatchTracker {
    id: String,
    total: u64,
    remaining: AtomicU64,
    succeeded: AtomicU64,
    status: Arc<StatusPublisher>,
}

impl BatchTracker {
    fn new(total: usize, status: Arc<StatusPublisher>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            total: total as u64,
            remaining: AtomicU64::new(total as u64),
            succeeded: AtomicU64::new(0),
            status,
        }
    }

    async fn complete(&self, outcome: MessageOutcome) {
        if outcome.is_acknowledged() {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let succeeded = self.succeeded.load(Ordering::Relaxed);
            self.status
                .bulk_completed(&self.id, self.total, succeeded, self.total - succeeded)
                .await;
        }
    }
}

/// Subscribes to every bound topic and runs one unit of work per message.
///
/// Concurrency is capped at `worker.max_concurrent`. When every permit is
/// taken the `saturation_policy` decides: `Block` stalls the poll loop,
/// `Reject` leaves the message pending for redelivery. Units complete and
/// acknowledge out of arrival order.
pub struct InboundEventRouter {
    consumer: Arc<dyn EventConsumer>,
    processor: Arc<MessageProcessor>,
    status: Arc<StatusPublisher>,
    config: WorkerConfig,
    batch_size: usize,
    permits: Arc<Semaphore>,
    in_flight: Arc<DashSet<MessageKey>>,
    stats: Arc<RouterStats>,
    shutdown: broadcast::Sender<()>,
}

impl InboundEventRouter {
    pub fn new(
        consumer: Arc<dyn EventConsumer>,
        processor: Arc<MessageProcessor>,
        status: Arc<StatusPublisher>,
        config: WorkerConfig,
        batch_size: usize,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            consumer,
            processor,
            status,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
            batch_size: batch_size.max(1),
            in_flight: Arc::new(DashSet::new()),
            stats: Arc::new(RouterStats::default()),
            shutdown,
        }
    }

    /// Get a shutdown signal sender
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> Arc<RouterStats> {
        Arc::clone(&self.stats)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run until a shutdown signal, then drain in-flight units.
    pub async fn run(&self) -> DrainReport {
        let topics = self.processor.handlers().topics();
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut backoff = ExponentialBackoff::new();

        loop {
            match self.consumer.subscribe(&topics).await {
                Ok(()) => break,
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::error!(
                        error = %e,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis(),
                        "Broker subscription failed, retrying with backoff"
                    );
                    tokio::select! {
                        _ = shutdown_rx.recv() => return DrainReport::default(),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        backoff.reset();

        tracing::info!(
            topics = ?topics,
            max_concurrent = self.config.max_concurrent,
            saturation_policy = ?self.config.saturation_policy,
            unit_timeout_ms = self.config.unit_timeout_ms,
            "Inbound event router started"
        );

        let mut units: JoinSet<MessageOutcome> = JoinSet::new();

        loop {
            while let Some(result) = units.try_join_next() {
                Self::reap(result);
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Inbound event router received shutdown signal");
                    break;
                }
                polled = self.consumer.poll(self.batch_size) => match polled {
                    Ok(batch) => {
                        backoff.reset();
                        if !self.dispatch_batch(batch, &mut units, &mut shutdown_rx).await {
                            break;
                        }
                    }
                    Err(e) => {
                        if !self.poll_failed(e, &mut backoff, &mut shutdown_rx).await {
                            break;
                        }
                    }
                }
            }
        }

        self.drain(units).await
    }

    /// Poll one batch and wait for all of its units to finish.
    ///
    /// Returns the outcome of every message that was started or rejected.
    pub async fn poll_once(&self) -> Result<Vec<MessageOutcome>, BrokerError> {
        let batch = self.consumer.poll(self.batch_size).await?;
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut units: JoinSet<MessageOutcome> = JoinSet::new();

        let rejected_before = self.stats.rejected.load(Ordering::Relaxed);
        self.dispatch_batch(batch, &mut units, &mut shutdown_rx).await;
        let rejected = self.stats.rejected.load(Ordering::Relaxed) - rejected_before;

        let mut outcomes = vec![MessageOutcome::Rejected; rejected as usize];
        while let Some(result) = units.join_next().await {
            if let Ok(outcome) = result {
                outcomes.push(outcome);
            } else {
                Self::reap(result);
            }
        }
        Ok(outcomes)
    }

    /// Start a unit per message. Returns false when shutdown interrupted
    /// the batch; unstarted messages stay pending.
    async fn dispatch_batch(
        &self,
        batch: Vec<InboundMessage>,
        units: &mut JoinSet<MessageOutcome>,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> bool {
        if batch.is_empty() {
            return true;
        }

        let tracker = (batch.len() > 1)
            .then(|| Arc::new(BatchTracker::new(batch.len(), Arc::clone(&self.status))));

        for message in batch {
            self.stats.received.fetch_add(1, Ordering::Relaxed);
            PipelineMetrics::record_received(&message.topic);

            let key = (message.topic.clone(), message.id.clone());
            if self.in_flight.contains(&key) {
                self.stats.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    topic = %message.topic,
                    message_id = %message.id,
                    "Message already in flight, skipping redelivery"
                );
                if let Some(tracker) = &tracker {
                    tracker.complete(MessageOutcome::Retained).await;
                }
                continue;
            }

            let permit = match self.acquire_permit(shutdown_rx).await {
                PermitDecision::Granted(permit) => permit,
                PermitDecision::Saturated => {
                    self.stats.record(MessageOutcome::Rejected);
                    PipelineMetrics::record_saturation_rejected();
                    PipelineMetrics::record_outcome(
                        &message.topic,
                        MessageOutcome::Rejected.as_str(),
                        Duration::ZERO,
                    );
                    tracing::warn!(
                        topic = %message.topic,
                        message_id = %message.id,
                        max_concurrent = self.config.max_concurrent,
                        "Worker pool saturated, message left for redelivery"
                    );
                    if let Some(tracker) = &tracker {
                        tracker.complete(MessageOutcome::Rejected).await;
                    }
                    continue;
                }
                PermitDecision::ShuttingDown => return false,
            };

            self.spawn_unit(message, key, permit, tracker.clone(), units);
        }

        true
    }

    async fn acquire_permit(&self, shutdown_rx: &mut broadcast::Receiver<()>) -> PermitDecision {
        match self.config.saturation_policy {
            SaturationPolicy::Reject => match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => PermitDecision::Granted(permit),
                Err(_) => PermitDecision::Saturated,
            },
            SaturationPolicy::Block => {
                tokio::select! {
                    permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                        Ok(permit) => PermitDecision::Granted(permit),
                        Err(_) => PermitDecision::ShuttingDown,
                    },
                    _ = shutdown_rx.recv() => PermitDecision::ShuttingDown,
                }
            }
        }
    }

    fn spawn_unit(
        &self,
        message: InboundMessage,
        key: MessageKey,
        permit: OwnedSemaphorePermit,
        tracker: Option<Arc<BatchTracker>>,
        units: &mut JoinSet<MessageOutcome>,
    ) {
        self.in_flight.insert(key.clone());
        PipelineMetrics::unit_started();
        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            key,
        };

        let processor = Arc::clone(&self.processor);
        let stats = Arc::clone(&self.stats);
        let unit_timeout = Duration::from_millis(self.config.unit_timeout_ms);
        let span = tracing::info_span!(
            "unit_of_work",
            topic = %message.topic,
            message_id = %message.id,
            delivery_count = message.delivery_count,
        );

        units.spawn(
            async move {
                let _permit = permit;
                let _guard = guard;
                let started = Instant::now();

                let unit = processor.process_message(&message);
                let outcome = match timeout(unit_timeout, unit).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::warn!(
                            timeout_ms = unit_timeout.as_millis(),
                            "Unit of work timed out, message left for redelivery"
                        );
                        MessageOutcome::TimedOut
                    }
                };

                stats.record(outcome);
                PipelineMetrics::record_outcome(
                    &message.topic,
                    outcome.as_str(),
                    started.elapsed(),
                );
                if let Some(tracker) = tracker {
                    tracker.complete(outcome).await;
                }
                outcome
            }
            .instrument(span),
        );
    }

    async fn poll_failed(
        &self,
        error: BrokerError,
        backoff: &mut ExponentialBackoff,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> bool {
        self.stats.poll_errors.fetch_add(1, Ordering::Relaxed);
        let delay = backoff.next_delay();
        tracing::error!(
            error = %error,
            attempt = backoff.attempt(),
            delay_ms = delay.as_millis(),
            "Broker poll failed, retrying with backoff"
        );

        tokio::select! {
            _ = shutdown_rx.recv() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn reap(result: Result<MessageOutcome, JoinError>) {
        if let Err(e) = result {
            if e.is_panic() {
                tracing::error!(error = %e, "Unit of work panicked, message left for redelivery");
            }
        }
    }

    async fn drain(&self, mut units: JoinSet<MessageOutcome>) -> DrainReport {
        let drain_timeout = Duration::from_secs(self.config.drain_timeout_secs);
        let pending = units.len();
        tracing::info!(
            in_flight = pending,
            drain_timeout_secs = self.config.drain_timeout_secs,
            "Draining in-flight units"
        );

        let mut completed = 0;
        let finished = timeout(drain_timeout, async {
            while let Some(result) = units.join_next().await {
                completed += 1;
                Self::reap(result);
            }
        })
        .await;

        let abandoned = if finished.is_err() {
            let abandoned = units.len();
            units.abort_all();
            tracing::warn!(
                abandoned = abandoned,
                "Drain timeout reached, abandoning units; their messages stay pending"
            );
            abandoned
        } else {
            0
        };

        tracing::info!(
            completed = completed,
            abandoned = abandoned,
            "Inbound event router stopped"
        );
        DrainReport {
            completed,
            abandoned,
        }
    }
}

enum PermitDecision {
    Granted(OwnedSemaphorePermit),
    Saturated,
    ShuttingDown,
}
