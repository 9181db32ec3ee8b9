use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::processor::MessageOutcome;

/// Statistics for the inbound event router
#[derive(Debug, Default)]
pub struct RouterStats {
    /// Messages handed out by the broker
    pub received: AtomicU64,
    /// Messages acknowledged after every route succeeded
    pub acknowledged: AtomicU64,
    /// Messages acknowledged without any route
    pub no_routes: AtomicU64,
    /// Malformed messages dead-lettered and acknowledged
    pub dead_lettered: AtomicU64,
    /// Messages left pending for redelivery
    pub retained: AtomicU64,
    pub timed_out: AtomicU64,
    /// Messages refused because the pool was saturated
    pub rejected: AtomicU64,
    /// Redeliveries skipped because the same message was still running
    pub duplicates_skipped: AtomicU64,
    pub poll_errors: AtomicU64,
}

impl RouterStats {
    pub fn record(&self, outcome: MessageOutcome) {
        let counter = match outcome {
            MessageOutcome::Acknowledged => &self.acknowledged,
            MessageOutcome::NoRoutes => &self.no_routes,
            MessageOutcome::DeadLettered => &self.dead_lettered,
            MessageOutcome::Retained | MessageOutcome::AckFailed => &self.retained,
            MessageOutcome::TimedOut => &self.timed_out,
            MessageOutcome::Rejected => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            no_routes: self.no_routes.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            retained: self.retained.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of router statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStatsSnapshot {
    pub received: u64,
    pub acknowledged: u64,
    pub no_routes: u64,
    pub dead_lettered: u64,
    pub retained: u64,
    pub timed_out: u64,
    pub rejected: u64,
    pub duplicates_skipped: u64,
    pub poll_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let stats = RouterStats::default();
        stats.received.fetch_add(4, Ordering::Relaxed);
        stats.record(MessageOutcome::Acknowledged);
        stats.record(MessageOutcome::Retained);
        stats.record(MessageOutcome::AckFailed);
        stats.record(MessageOutcome::TimedOut);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.received, 4);
        assert_eq!(snapshot.acknowledged, 1);
        assert_eq!(snapshot.retained, 2);
        assert_eq!(snapshot.timed_out, 1);
        assert_eq!(snapshot.dead_lettered, 0);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["deadLettered"], 0);
    }
}
