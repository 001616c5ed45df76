//! Worker runtime
//!
//! Spawns a driver in an isolated tokio task and supervises it:
//!
//! - Panics stay inside the worker task and surface as a `Crashed`
//!   terminal outcome, never as a process failure.
//! - A 1 Hz aggregator publishes throughput snapshots alongside the
//!   driver's per-attempt events.
//! - Cancellation is cooperative; a worker that ignores the flag past
//!   the grace period is aborted as a last resort.
//! - Exactly one `Terminated` event is emitted per worker lifetime,
//!   after teardown, and it is never dropped.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use surge_core::{
    Driver, DriverContext, IdentityPool, RelayDescriptor, TargetNode, TelemetrySink,
    TelemetrySnapshot, WorkerCounters, WorkerEvent, WorkerOutcome,
};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Event channel capacity; per-attempt events beyond this are dropped.
pub const TELEMETRY_BUFFER: usize = 1024;

/// Throughput snapshot cadence.
const AGGREGATE_INTERVAL: Duration = Duration::from_secs(1);

/// Default grace between cancellation and a forced abort.
pub const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Immutable inputs for one worker spawn.
#[derive(Debug, Clone)]
pub struct WorkerInputs {
    pub target: TargetNode,
    pub relays: Arc<Vec<RelayDescriptor>>,
    pub identities: Arc<IdentityPool>,
    pub duration: Duration,
    pub packet_delay: Duration,
    pub packet_size: usize,
}

/// Handle to a spawned worker.
///
/// The event receiver is taken once by whoever pumps the worker's
/// telemetry; the handle itself stays with the session entry for
/// cancellation and inspection.
pub struct WorkerHandle {
    pub id: Uuid,
    running: Arc<AtomicBool>,
    counters: Arc<WorkerCounters>,
    cancel: Arc<Notify>,
    events: Option<mpsc::Receiver<WorkerEvent>>,
    supervisor: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal cooperative cancellation. Idempotent; safe after the
    /// worker has already terminated.
    pub fn cancel(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.cancel.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Cumulative successful attempts so far.
    pub fn total(&self) -> u64 {
        self.counters.attempts()
    }

    /// Take the event receiver. Yields `Some` exactly once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<WorkerEvent>> {
        self.events.take()
    }

    /// True once the supervisor has emitted the terminal event.
    pub fn is_finished(&self) -> bool {
        self.supervisor.is_finished()
    }

    /// Wait for the supervisor to finish teardown.
    pub async fn join(self) {
        let _ = self.supervisor.await;
    }
}

/// Factory for supervised workers.
#[derive(Debug, Clone)]
pub struct WorkerRuntime {
    grace: Duration,
}

impl Default for WorkerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRuntime {
    pub fn new() -> Self {
        Self {
            grace: CANCEL_GRACE,
        }
    }

    /// Override the cancellation grace period.
    pub fn with_grace(grace: Duration) -> Self {
        Self { grace }
    }

    /// Spawn `driver` with `inputs` in an isolated task.
    pub fn spawn(&self, driver: Arc<dyn Driver>, inputs: WorkerInputs) -> WorkerHandle {
        let id = Uuid::new_v4();
        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(WorkerCounters::default());
        let cancel = Arc::new(Notify::new());
        let (tx, rx) = mpsc::channel(TELEMETRY_BUFFER);

        let relays = inputs.relays.len();
        let ctx = DriverContext {
            target: inputs.target,
            relays: inputs.relays,
            identities: inputs.identities,
            duration: inputs.duration,
            packet_delay: inputs.packet_delay,
            packet_size: inputs.packet_size,
            // A duration too large for the clock means "no deadline";
            // the orchestrator bounds client-supplied values upstream.
            deadline: Instant::now()
                .checked_add(inputs.duration)
                // Equivalent to tokio's private `Instant::far_future()`.
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(86400 * 365 * 30)),
            running: running.clone(),
            sink: TelemetrySink::new(tx.clone(), counters.clone(), relays),
        };

        info!(
            id = %id,
            driver = %driver.descriptor().id,
            relays,
            duration_ms = inputs.duration.as_millis() as u64,
            "Spawning worker"
        );

        let aggregator = spawn_aggregator(tx.clone(), counters.clone(), relays);
        let mut driver_task = tokio::spawn(async move { driver.run(ctx).await });

        let grace = self.grace;
        let supervisor = {
            let running = running.clone();
            let counters = counters.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let outcome = tokio::select! {
                    res = &mut driver_task => {
                        judge(res, !running.load(Ordering::Relaxed))
                    }
                    _ = cancel.notified() => {
                        running.store(false, Ordering::Relaxed);
                        match timeout(grace, &mut driver_task).await {
                            Ok(res) => judge(res, true),
                            Err(_) => {
                                warn!(id = %id, "Worker ignored cancellation, aborting");
                                driver_task.abort();
                                let _ = driver_task.await;
                                WorkerOutcome::Cancelled
                            }
                        }
                    }
                };
                running.store(false, Ordering::Relaxed);

                // Stop the aggregator before the terminal event so no
                // snapshot trails it.
                aggregator.abort();
                let _ = aggregator.await;

                let total = counters.attempts();
                match &outcome {
                    WorkerOutcome::Completed => info!(id = %id, total, "Worker completed"),
                    WorkerOutcome::Cancelled => info!(id = %id, total, "Worker cancelled"),
                    WorkerOutcome::Failed(e) => error!(id = %id, error = %e, "Worker failed"),
                    WorkerOutcome::Crashed(e) => error!(id = %id, error = %e, "Worker crashed"),
                }
                let _ = tx.send(WorkerEvent::Terminated { total, outcome }).await;
            })
        };

        WorkerHandle {
            id,
            running,
            counters,
            cancel,
            events: Some(rx),
            supervisor,
        }
    }
}

/// Map a joined driver task to a terminal outcome.
fn judge(
    result: Result<surge_core::Result<()>, tokio::task::JoinError>,
    cancelled: bool,
) -> WorkerOutcome {
    match result {
        Ok(Ok(())) if cancelled => WorkerOutcome::Cancelled,
        Ok(Ok(())) => WorkerOutcome::Completed,
        Ok(Err(e)) => WorkerOutcome::Failed(e.to_string()),
        Err(join) if join.is_panic() => {
            let panic = join.into_panic();
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker panicked".to_string());
            WorkerOutcome::Crashed(message)
        }
        Err(_) => WorkerOutcome::Cancelled,
    }
}

/// 1 Hz snapshot pump. pps is the delta of successful attempts since the
/// previous snapshot.
fn spawn_aggregator(
    tx: mpsc::Sender<WorkerEvent>,
    counters: Arc<WorkerCounters>,
    relays: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(AGGREGATE_INTERVAL);
        ticker.tick().await;
        let mut last_total = 0u64;
        loop {
            ticker.tick().await;
            let total = counters.attempts();
            let snapshot = TelemetrySnapshot {
                timestamp: Utc::now(),
                pps: total.saturating_sub(last_total),
                total,
                relays,
                log: None,
            };
            last_total = total;
            if tx.try_send(WorkerEvent::Stats(snapshot)).is_err() && tx.is_closed() {
                debug!("Telemetry channel closed, aggregator stopping");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use surge_core::{DriverDescriptor, Error, LogEntry, RelayProtocol, Result};
    use tokio::time::MissedTickBehavior;

    static STUB: DriverDescriptor = DriverDescriptor {
        id: "stub",
        name: "Stub",
        description: "test stub",
        supported: &[RelayProtocol::Http],
    };

    /// Emits one success per tick until deadline or cancellation.
    struct TickDriver;

    #[async_trait]
    impl Driver for TickDriver {
        fn descriptor(&self) -> &DriverDescriptor {
            &STUB
        }

        async fn run(&self, ctx: DriverContext) -> Result<()> {
            let mut ticker = tokio::time::interval(ctx.tick_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            while ctx.should_continue() {
                ticker.tick().await;
                if !ctx.should_continue() {
                    break;
                }
                ctx.sink.success(LogEntry::new("tick"));
            }
            Ok(())
        }
    }

    /// Panics after the first tick.
    struct PanicDriver;

    #[async_trait]
    impl Driver for PanicDriver {
        fn descriptor(&self) -> &DriverDescriptor {
            &STUB
        }

        async fn run(&self, _ctx: DriverContext) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            panic!("stub blew up");
        }
    }

    /// Rejects its parameters before doing anything.
    struct FailDriver;

    #[async_trait]
    impl Driver for FailDriver {
        fn descriptor(&self) -> &DriverDescriptor {
            &STUB
        }

        async fn run(&self, _ctx: DriverContext) -> Result<()> {
            Err(Error::invalid_parameter("target", "bad"))
        }
    }

    /// Never observes the cancellation flag.
    struct StubbornDriver;

    #[async_trait]
    impl Driver for StubbornDriver {
        fn descriptor(&self) -> &DriverDescriptor {
            &STUB
        }

        async fn run(&self, _ctx: DriverContext) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn inputs(duration: Duration, delay: Duration) -> WorkerInputs {
        WorkerInputs {
            target: TargetNode::parse("example.com").unwrap(),
            relays: Arc::new(surge_core::relay::parse_relay_list("http://r:8080\n")),
            identities: Arc::new(IdentityPool::default()),
            duration,
            packet_delay: delay,
            packet_size: 16,
        }
    }

    /// Drain events until the terminal one, counting driver attempts.
    async fn drain(
        mut rx: mpsc::Receiver<WorkerEvent>,
    ) -> (usize, u64, WorkerOutcome) {
        let mut attempts = 0usize;
        loop {
            match rx.recv().await.expect("terminal event must arrive") {
                WorkerEvent::Stats(s) => {
                    if s.log.is_some() {
                        attempts += 1;
                    }
                }
                WorkerEvent::Terminated { total, outcome } => {
                    assert!(rx.recv().await.is_none(), "nothing after the terminal event");
                    return (attempts, total, outcome);
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_runs_to_deadline() {
        let runtime = WorkerRuntime::new();
        let mut handle = runtime.spawn(
            Arc::new(TickDriver),
            inputs(Duration::from_secs(1), Duration::from_millis(100)),
        );
        let rx = handle.take_events().unwrap();

        let (attempts, total, outcome) = drain(rx).await;
        assert_eq!(outcome, WorkerOutcome::Completed);
        assert!((5..=15).contains(&attempts), "attempts = {attempts}");
        assert_eq!(total as usize, attempts);
        assert!(!handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooperative_cancellation() {
        let runtime = WorkerRuntime::new();
        let mut handle = runtime.spawn(
            Arc::new(TickDriver),
            inputs(Duration::from_secs(3600), Duration::from_millis(100)),
        );
        let rx = handle.take_events().unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        handle.cancel();
        handle.cancel(); // idempotent

        let (_, _, outcome) = drain(rx).await;
        assert_eq!(outcome, WorkerOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stubborn_worker_is_aborted_after_grace() {
        let runtime = WorkerRuntime::with_grace(Duration::from_millis(200));
        let mut handle = runtime.spawn(
            Arc::new(StubbornDriver),
            inputs(Duration::from_secs(3600), Duration::from_millis(100)),
        );
        let rx = handle.take_events().unwrap();

        handle.cancel();
        let (_, _, outcome) = drain(rx).await;
        assert_eq!(outcome, WorkerOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_panic_is_contained_as_crash() {
        let runtime = WorkerRuntime::new();
        let mut handle = runtime.spawn(
            Arc::new(PanicDriver),
            inputs(Duration::from_secs(1), Duration::from_millis(10)),
        );
        let rx = handle.take_events().unwrap();

        let (_, total, outcome) = drain(rx).await;
        assert_eq!(total, 0);
        match outcome {
            WorkerOutcome::Crashed(msg) => assert!(msg.contains("stub blew up")),
            other => panic!("expected crash, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_driver_error_is_failed_outcome() {
        let runtime = WorkerRuntime::new();
        let mut handle = runtime.spawn(
            Arc::new(FailDriver),
            inputs(Duration::from_secs(1), Duration::from_millis(10)),
        );
        let rx = handle.take_events().unwrap();

        let (_, _, outcome) = drain(rx).await;
        assert!(matches!(outcome, WorkerOutcome::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extreme_duration_does_not_overflow_deadline() {
        let runtime = WorkerRuntime::new();
        let mut handle = runtime.spawn(
            Arc::new(TickDriver),
            inputs(Duration::from_secs(u64::MAX), Duration::from_millis(100)),
        );
        let rx = handle.take_events().unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        handle.cancel();
        let (_, _, outcome) = drain(rx).await;
        assert_eq!(outcome, WorkerOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_after_termination_is_safe() {
        let runtime = WorkerRuntime::new();
        let mut handle = runtime.spawn(
            Arc::new(FailDriver),
            inputs(Duration::from_secs(1), Duration::from_millis(10)),
        );
        let rx = handle.take_events().unwrap();
        drain(rx).await;

        handle.cancel();
        handle.join().await;
    }
}
