//! Session orchestration
//!
//! One session owns at most one live worker. `start` validates the full
//! request and rejects without any state change; on success it spawns a
//! worker, parks the handle in the session table, and pumps worker events
//! to the session's outbound channel in arrival order. The terminal event
//! frees the slot and becomes exactly one `Ended`.

use crate::runtime::{WorkerHandle, WorkerInputs, WorkerRuntime};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use surge_core::{
    relay::filter_by_protocols, DriverRegistry, Error, IdentityPool, RelayDescriptor, Result,
    TargetNode, TelemetrySnapshot, WorkerEvent, WorkerOutcome,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Longest duration a single session may request. Anything above this is
/// a client error, and unbounded values would overflow the worker's
/// monotonic deadline.
pub const MAX_SESSION_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Live view of the relay directory and identity pool.
///
/// The orchestrator snapshots both at session start; replacing the
/// directory never disturbs a running worker.
pub trait RelaySource: Send + Sync {
    fn relays(&self) -> Arc<Vec<RelayDescriptor>>;
    fn identities(&self) -> Arc<IdentityPool>;
}

/// Validated-on-start request for one attack session.
#[derive(Debug, Clone)]
pub struct SessionParameters {
    pub target: String,
    pub driver: String,
    pub duration: Duration,
    pub packet_delay: Duration,
    pub packet_size: usize,
}

/// Events a session's consumer sees, in worker arrival order.
#[derive(Debug)]
pub enum SessionEvent {
    Stats(TelemetrySnapshot),
    /// Exactly once per worker lifetime, after teardown.
    Ended { total: u64, outcome: WorkerOutcome },
}

/// Accepted start, reported back to the control channel.
#[derive(Debug, Clone, Copy)]
pub struct SessionStart {
    pub worker: Uuid,
    /// Relays handed to the worker after protocol filtering.
    pub relays: usize,
    pub accepted_at: chrono::DateTime<chrono::Utc>,
}

struct SessionEntry {
    handle: WorkerHandle,
}

/// Orchestrates sessions over a shared worker runtime.
pub struct SessionOrchestrator {
    registry: Arc<DriverRegistry>,
    source: Arc<dyn RelaySource>,
    runtime: WorkerRuntime,
    sessions: Arc<DashMap<Uuid, SessionEntry>>,
    allow_empty: bool,
}

impl SessionOrchestrator {
    pub fn new(
        registry: Arc<DriverRegistry>,
        source: Arc<dyn RelaySource>,
        runtime: WorkerRuntime,
        allow_empty: bool,
    ) -> Self {
        Self {
            registry,
            source,
            runtime,
            sessions: Arc::new(DashMap::new()),
            allow_empty,
        }
    }

    /// Start a worker for `session`, pumping its events into `events`.
    ///
    /// Rejections leave the session untouched: the caller can retry with
    /// corrected parameters immediately.
    pub fn start(
        &self,
        session: Uuid,
        params: SessionParameters,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<SessionStart> {
        if params.duration.is_zero() {
            return Err(Error::invalid_parameter("duration", "must be positive"));
        }
        if params.duration > MAX_SESSION_DURATION {
            return Err(Error::invalid_parameter(
                "duration",
                "exceeds the maximum session duration",
            ));
        }
        let target = TargetNode::parse(&params.target)?;
        let driver = self
            .registry
            .resolve(&params.driver)
            .ok_or_else(|| Error::DriverNotFound(params.driver.clone()))?;

        let relays = Arc::new(filter_by_protocols(
            &self.source.relays(),
            driver.descriptor().supported,
        ));
        if relays.is_empty() && !self.allow_empty {
            return Err(Error::NoMatchingRelays);
        }

        // Reserve the slot before spawning so two racing starts cannot
        // both pass the busy check; the second loses the entry race and
        // never touches the first worker.
        let slot = match self.sessions.entry(session) {
            Entry::Occupied(_) => return Err(Error::SessionBusy),
            Entry::Vacant(slot) => slot,
        };

        let mut handle = self.runtime.spawn(
            driver,
            WorkerInputs {
                target,
                relays: relays.clone(),
                identities: self.source.identities(),
                duration: params.duration,
                packet_delay: params.packet_delay,
                packet_size: params.packet_size,
            },
        );
        let worker = handle.id;
        // take_events yields Some on a freshly spawned handle
        let rx = match handle.take_events() {
            Some(rx) => rx,
            None => {
                handle.cancel();
                return Err(Error::ExecutionFailed(
                    "worker events already taken".to_string(),
                ));
            }
        };

        info!(
            session = %session,
            worker = %worker,
            driver = %params.driver,
            relays = relays.len(),
            "Session started"
        );

        // The guard returned by insert holds the shard lock; release it
        // before the forwarder task can touch the map.
        drop(slot.insert(SessionEntry { handle }));
        tokio::spawn(forward(self.sessions.clone(), session, rx, events));

        Ok(SessionStart {
            worker,
            relays: relays.len(),
            accepted_at: chrono::Utc::now(),
        })
    }

    /// Cancel the session's worker if one is attached. No-op otherwise;
    /// returns whether a worker was signaled.
    pub fn stop(&self, session: Uuid) -> bool {
        match self.sessions.get(&session) {
            Some(entry) => {
                info!(session = %session, worker = %entry.handle.id, "Stopping session");
                entry.handle.cancel();
                true
            }
            None => {
                debug!(session = %session, "Stop for idle session ignored");
                false
            }
        }
    }

    /// Session consumer went away: stop whatever is running and release
    /// the session.
    pub fn on_disconnect(&self, session: Uuid) {
        if self.stop(session) {
            debug!(session = %session, "Worker cancelled on disconnect");
        }
    }

    /// True while a worker occupies the session's slot.
    pub fn is_busy(&self, session: Uuid) -> bool {
        self.sessions.contains_key(&session)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Cancel every worker and wait (bounded) for teardown to finish.
    pub async fn shutdown(&self, grace: Duration) {
        let ids: Vec<Uuid> = self.sessions.iter().map(|e| *e.key()).collect();
        if ids.is_empty() {
            return;
        }
        info!(sessions = ids.len(), "Shutting down all sessions");
        for id in &ids {
            self.stop(*id);
        }

        let deadline = tokio::time::Instant::now() + grace;
        while !self.sessions.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        if !self.sessions.is_empty() {
            warn!(
                remaining = self.sessions.len(),
                "Sessions still tearing down at shutdown deadline"
            );
        }
    }
}

/// Pump worker events to the session consumer. The terminal event frees
/// the session slot first, then surfaces as `Ended`, so a follow-up start
/// observes the free slot no later than the consumer observes the end.
async fn forward(
    sessions: Arc<DashMap<Uuid, SessionEntry>>,
    session: Uuid,
    mut rx: mpsc::Receiver<WorkerEvent>,
    events: mpsc::Sender<SessionEvent>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            WorkerEvent::Stats(snapshot) => {
                // A gone consumer is not a reason to stop draining; the
                // worker is cancelled separately via on_disconnect.
                let _ = events.send(SessionEvent::Stats(snapshot)).await;
            }
            WorkerEvent::Terminated { total, outcome } => {
                sessions.remove(&session);
                debug!(session = %session, total, ?outcome, "Session slot released");
                let _ = events.send(SessionEvent::Ended { total, outcome }).await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use surge_core::{
        Driver, DriverContext, DriverDescriptor, LogEntry, RelayProtocol,
    };
    use tokio::time::MissedTickBehavior;

    struct StubSource {
        relays: Arc<Vec<RelayDescriptor>>,
        identities: Arc<IdentityPool>,
    }

    impl StubSource {
        fn new(relay_text: &str) -> Arc<Self> {
            Arc::new(Self {
                relays: Arc::new(surge_core::relay::parse_relay_list(relay_text)),
                identities: Arc::new(IdentityPool::default()),
            })
        }
    }

    impl RelaySource for StubSource {
        fn relays(&self) -> Arc<Vec<RelayDescriptor>> {
            self.relays.clone()
        }

        fn identities(&self) -> Arc<IdentityPool> {
            self.identities.clone()
        }
    }

    static TICK: DriverDescriptor = DriverDescriptor {
        id: "tick",
        name: "Tick",
        description: "test stub",
        supported: &[RelayProtocol::Http],
    };

    static SOCKS_ONLY: DriverDescriptor = DriverDescriptor {
        id: "socks_tick",
        name: "Socks Tick",
        description: "test stub",
        supported: &[RelayProtocol::Socks5],
    };

    struct TickDriver {
        descriptor: &'static DriverDescriptor,
    }

    #[async_trait]
    impl Driver for TickDriver {
        fn descriptor(&self) -> &DriverDescriptor {
            self.descriptor
        }

        async fn run(&self, ctx: DriverContext) -> surge_core::Result<()> {
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

    fn registry() -> Arc<DriverRegistry> {
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(TickDriver { descriptor: &TICK }));
        registry.register(Arc::new(TickDriver {
            descriptor: &SOCKS_ONLY,
        }));
        Arc::new(registry)
    }

    fn orchestrator(relay_text: &str, allow_empty: bool) -> SessionOrchestrator {
        SessionOrchestrator::new(
            registry(),
            StubSource::new(relay_text),
            WorkerRuntime::with_grace(Duration::from_millis(200)),
            allow_empty,
        )
    }

    fn params(driver: &str, duration: Duration) -> SessionParameters {
        SessionParameters {
            target: "example.com".to_string(),
            driver: driver.to_string(),
            duration,
            packet_delay: Duration::from_millis(50),
            packet_size: 16,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<SessionEvent>) -> (usize, u64, WorkerOutcome) {
        let mut attempts = 0usize;
        loop {
            match rx.recv().await.expect("session stream must end") {
                SessionEvent::Stats(s) => {
                    if s.log.is_some() {
                        attempts += 1;
                    }
                }
                SessionEvent::Ended { total, outcome } => return (attempts, total, outcome),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_full_lifecycle() {
        let orchestrator = orchestrator("http://r:8080\n", false);
        let session = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(64);

        let started = orchestrator
            .start(session, params("tick", Duration::from_millis(500)), tx)
            .unwrap();
        assert_eq!(started.relays, 1);
        assert!(orchestrator.is_busy(session));

        let (attempts, total, outcome) = drain(rx).await;
        assert_eq!(outcome, WorkerOutcome::Completed);
        assert!(attempts > 0);
        assert_eq!(total as usize, attempts);

        // Slot freed no later than the Ended event.
        assert!(!orchestrator.is_busy(session));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_busy_is_rejected_without_side_effects() {
        let orchestrator = orchestrator("http://r:8080\n", false);
        let session = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(64);

        orchestrator
            .start(session, params("tick", Duration::from_millis(500)), tx.clone())
            .unwrap();
        let err = orchestrator
            .start(session, params("tick", Duration::from_millis(500)), tx)
            .unwrap_err();
        assert!(matches!(err, Error::SessionBusy));

        // Only one worker's events on the stream, one Ended.
        let (_, _, outcome) = drain(rx).await;
        assert_eq!(outcome, WorkerOutcome::Completed);
    }

    #[tokio::test]
    async fn test_rejections_leave_session_idle() {
        let orchestrator = orchestrator("http://r:8080\n", false);
        let session = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(64);

        let err = orchestrator
            .start(session, params("nope", Duration::from_secs(1)), tx.clone())
            .unwrap_err();
        assert!(matches!(err, Error::DriverNotFound(_)));

        let err = orchestrator
            .start(session, params("tick", Duration::ZERO), tx.clone())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));

        // http relays only; the socks-only driver has nothing to use.
        let err = orchestrator
            .start(session, params("socks_tick", Duration::from_secs(1)), tx)
            .unwrap_err();
        assert!(matches!(err, Error::NoMatchingRelays));

        assert!(!orchestrator.is_busy(session));
        assert_eq!(orchestrator.active_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_duration_is_rejected() {
        let orchestrator = orchestrator("http://r:8080\n", false);
        let session = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(64);

        // Large enough to overflow a monotonic deadline if it ever
        // reached the worker runtime.
        let err = orchestrator
            .start(session, params("tick", Duration::from_secs(u64::MAX)), tx)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));
        assert!(!orchestrator.is_busy(session));
    }

    #[tokio::test]
    async fn test_empty_directory_allowed_when_configured() {
        let orchestrator = orchestrator("", true);
        let session = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(64);

        let started = orchestrator
            .start(session, params("tick", Duration::from_millis(200)), tx)
            .unwrap();
        assert_eq!(started.relays, 0);

        let (_, _, outcome) = drain(rx).await;
        assert_eq!(outcome, WorkerOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_and_second_stop_is_noop() {
        let orchestrator = orchestrator("http://r:8080\n", false);
        let session = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(64);

        orchestrator
            .start(session, params("tick", Duration::from_secs(3600)), tx)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(orchestrator.stop(session));
        let (_, _, outcome) = drain(rx).await;
        assert_eq!(outcome, WorkerOutcome::Cancelled);

        assert!(!orchestrator.stop(session));
        assert!(!orchestrator.is_busy(session));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_end_gets_fresh_counters() {
        let orchestrator = orchestrator("http://r:8080\n", false);
        let session = Uuid::new_v4();

        let (tx, rx) = mpsc::channel(64);
        orchestrator
            .start(session, params("tick", Duration::from_millis(300)), tx)
            .unwrap();
        let (_, first_total, _) = drain(rx).await;
        assert!(first_total > 0);

        let (tx, rx) = mpsc::channel(64);
        let started = orchestrator
            .start(session, params("tick", Duration::from_millis(100)), tx)
            .unwrap();
        let (_, second_total, _) = drain(rx).await;
        // New worker, new counters: the short run cannot inherit the
        // longer run's totals.
        assert!(second_total < first_total);
        assert_ne!(started.worker, Uuid::nil());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_all_sessions() {
        let orchestrator = orchestrator("http://r:8080\n", false);
        let (tx, _rx) = mpsc::channel(64);
        for _ in 0..3 {
            orchestrator
                .start(
                    Uuid::new_v4(),
                    params("tick", Duration::from_secs(3600)),
                    tx.clone(),
                )
                .unwrap();
        }
        assert_eq!(orchestrator.active_count(), 3);

        orchestrator.shutdown(Duration::from_secs(2)).await;
        assert_eq!(orchestrator.active_count(), 0);
    }
}
