//! Metrics for monitoring partition supply.
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                   SupplyMetrics                     │
//! │  ┌──────────────────────┐  ┌─────────────────────┐ │
//! │  │       Counters       │  │       Gauges        │ │
//! │  │ - demands            │  │ - suspended         │ │
//! │  │ - messages/entries   │  │   contexts          │ │
//! │  │ - missed/completed   │  │                     │ │
//! │  │ - failures/sweeps    │  │                     │ │
//! │  └──────────────────────┘  └─────────────────────┘ │
//! └────────────────────────────────────────────────────┘
//! ```

mod counters;
mod gauges;

pub use counters::Counter;
pub use gauges::Gauge;

use std::fmt::Write;

/// Counters and gauges of one supply engine.
#[derive(Debug)]
pub struct SupplyMetrics {
    /// Demands received.
    pub demands_total: Counter,
    /// Demands ignored because the session had already completed.
    pub demands_ignored: Counter,
    /// Supply messages sent.
    pub messages_sent: Counter,
    /// Entries sent.
    pub entries_sent: Counter,
    /// Entry bytes sent.
    pub bytes_sent: Counter,
    /// Partitions reported as missed.
    pub partitions_missed: Counter,
    /// Partitions fully supplied.
    pub partitions_completed: Counter,
    /// Times a session was suspended waiting for acknowledgement.
    pub suspensions: Counter,
    /// Sessions that supplied all requested partitions.
    pub sessions_completed: Counter,
    /// Sessions abandoned because a send failed.
    pub send_failures: Counter,
    /// Suspended sessions dropped by the idle sweep.
    pub contexts_swept: Counter,
    /// Suspended sessions dropped because their requester left.
    pub contexts_purged: Counter,
    /// Sessions currently suspended.
    pub suspended_contexts: Gauge,
}

impl SupplyMetrics {
    /// Create a zeroed metrics instance.
    pub fn new() -> Self {
        Self {
            demands_total: Counter::new("supply_demands_total", "Demands received"),
            demands_ignored: Counter::new(
                "supply_demands_ignored_total",
                "Demands for already completed sessions",
            ),
            messages_sent: Counter::new("supply_messages_sent_total", "Supply messages sent"),
            entries_sent: Counter::new("supply_entries_sent_total", "Entries sent"),
            bytes_sent: Counter::new("supply_bytes_sent_total", "Entry bytes sent"),
            partitions_missed: Counter::new(
                "supply_partitions_missed_total",
                "Partitions reported as missed",
            ),
            partitions_completed: Counter::new(
                "supply_partitions_completed_total",
                "Partitions fully supplied",
            ),
            suspensions: Counter::new("supply_suspensions_total", "Session suspensions"),
            sessions_completed: Counter::new(
                "supply_sessions_completed_total",
                "Sessions fully supplied",
            ),
            send_failures: Counter::new("supply_send_failures_total", "Failed supply sends"),
            contexts_swept: Counter::new(
                "supply_contexts_swept_total",
                "Idle suspended sessions dropped",
            ),
            contexts_purged: Counter::new(
                "supply_contexts_purged_total",
                "Suspended sessions dropped after requester left",
            ),
            suspended_contexts: Gauge::new(
                "supply_suspended_contexts",
                "Sessions currently suspended",
            ),
        }
    }

    /// Record a sent supply message.
    pub fn record_sent(&self, entries: usize, bytes: usize) {
        self.messages_sent.inc();
        self.entries_sent.inc_by(entries as u64);
        self.bytes_sent.inc_by(bytes as u64);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> SupplyMetricsSnapshot {
        SupplyMetricsSnapshot {
            demands_total: self.demands_total.get(),
            demands_ignored: self.demands_ignored.get(),
            messages_sent: self.messages_sent.get(),
            entries_sent: self.entries_sent.get(),
            bytes_sent: self.bytes_sent.get(),
            partitions_missed: self.partitions_missed.get(),
            partitions_completed: self.partitions_completed.get(),
            suspensions: self.suspensions.get(),
            sessions_completed: self.sessions_completed.get(),
            send_failures: self.send_failures.get(),
            contexts_swept: self.contexts_swept.get(),
            contexts_purged: self.contexts_purged.get(),
            suspended_contexts: self.suspended_contexts.get(),
        }
    }

    /// Format metrics in Prometheus exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        let counters = [
            &self.demands_total,
            &self.demands_ignored,
            &self.messages_sent,
            &self.entries_sent,
            &self.bytes_sent,
            &self.partitions_missed,
            &self.partitions_completed,
            &self.suspensions,
            &self.sessions_completed,
            &self.send_failures,
            &self.contexts_swept,
            &self.contexts_purged,
        ];
        for c in counters {
            let _ = write!(
                output,
                "# HELP {name} {}\n# TYPE {name} counter\n{name} {}\n",
                c.help(),
                c.get(),
                name = c.name(),
            );
        }

        let g = &self.suspended_contexts;
        let _ = write!(
            output,
            "# HELP {name} {}\n# TYPE {name} gauge\n{name} {}\n",
            g.help(),
            g.get(),
            name = g.name(),
        );

        output
    }
}

impl Default for SupplyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`SupplyMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupplyMetricsSnapshot {
    pub demands_total: u64,
    pub demands_ignored: u64,
    pub messages_sent: u64,
    pub entries_sent: u64,
    pub bytes_sent: u64,
    pub partitions_missed: u64,
    pub partitions_completed: u64,
    pub suspensions: u64,
    pub sessions_completed: u64,
    pub send_failures: u64,
    pub contexts_swept: u64,
    pub contexts_purged: u64,
    pub suspended_contexts: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sent() {
        let metrics = SupplyMetrics::new();
        metrics.record_sent(10, 1000);
        metrics.record_sent(5, 200);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_sent, 2);
        assert_eq!(snapshot.entries_sent, 15);
        assert_eq!(snapshot.bytes_sent, 1200);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = SupplyMetrics::new();
        metrics.demands_total.inc();
        metrics.suspended_contexts.inc();

        let output = metrics.to_prometheus();
        assert!(output.contains("# TYPE supply_demands_total counter"));
        assert!(output.contains("supply_demands_total 1"));
        assert!(output.contains("# TYPE supply_suspended_contexts gauge"));
        assert!(output.contains("supply_suspended_contexts 1"));
    }
}
