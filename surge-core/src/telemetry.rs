//! Telemetry types exchanged between a worker and its supervisor.
//!
//! Per-attempt outcomes are folded into [`TelemetrySnapshot`] events and
//! pushed through a bounded channel. The channel is lossy for attempt
//! events (drop-on-full): every snapshot carries the cumulative total, so
//! a dropped event never skews the counters the control channel sees.
//! Terminal events are delivered on a non-lossy path by the runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Structured log entry attached to a telemetry snapshot.
///
/// The `key` is a stable identifier the presentation layer localizes;
/// `params` carry the variable pieces (relay label, target, error text).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub key: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl LogEntry {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// Live throughput snapshot for one worker.
///
/// `total` is strictly monotonic within one worker's lifetime and resets
/// to zero only when a new worker is spawned.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub timestamp: DateTime<Utc>,
    /// Successful attempts during the last aggregation interval
    pub pps: u64,
    /// Cumulative successful attempts for this worker
    pub total: u64,
    /// Number of relays the worker was given
    pub relays: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogEntry>,
}

/// How a worker reached its terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Wall-clock deadline reached
    Completed,
    /// External cancellation (stop or disconnect)
    Cancelled,
    /// The driver returned an error before any attempt was made
    Failed(String),
    /// Uncaught fault inside the driver, contained at the isolation boundary
    Crashed(String),
}

/// Event stream from a worker runtime to the orchestrator.
#[derive(Debug)]
pub enum WorkerEvent {
    Stats(TelemetrySnapshot),
    /// Emitted exactly once per worker lifecycle, after teardown.
    Terminated { total: u64, outcome: WorkerOutcome },
}

/// Thread-safe attempt counters, shared between a worker and its handle.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    attempts: AtomicU64,
    failures: AtomicU64,
}

impl WorkerCounters {
    pub fn record_attempt(&self) -> u64 {
        self.attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_failure(&self) -> u64 {
        self.failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Attempt-outcome sink handed to a driver.
///
/// Cloneable; drivers pass clones into the tasks they spawn per attempt.
#[derive(Debug, Clone)]
pub struct TelemetrySink {
    tx: mpsc::Sender<WorkerEvent>,
    counters: Arc<WorkerCounters>,
    relays: usize,
}

impl TelemetrySink {
    pub fn new(tx: mpsc::Sender<WorkerEvent>, counters: Arc<WorkerCounters>, relays: usize) -> Self {
        Self {
            tx,
            counters,
            relays,
        }
    }

    /// Record a successful attempt and publish a snapshot.
    pub fn success(&self, log: LogEntry) {
        let total = self.counters.record_attempt();
        self.push(total, log);
    }

    /// Record a failed attempt and publish a snapshot. Failures never
    /// advance the cumulative success counter.
    pub fn failure(&self, log: LogEntry) {
        self.counters.record_failure();
        self.push(self.counters.attempts(), log);
    }

    /// Cumulative successful attempts so far.
    pub fn total(&self) -> u64 {
        self.counters.attempts()
    }

    fn push(&self, total: u64, log: LogEntry) {
        let snapshot = TelemetrySnapshot {
            timestamp: Utc::now(),
            pps: 0,
            total,
            relays: self.relays,
            log: Some(log),
        };
        // Lossy by policy: if the control channel cannot keep up we drop
        // the event rather than block the attempt path.
        let _ = self.tx.try_send(WorkerEvent::Stats(snapshot));
    }
}
