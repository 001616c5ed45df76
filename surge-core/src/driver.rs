//! Driver trait, context and registry
//!
//! A driver implements one traffic pattern. It consumes a [`DriverContext`]
//! (immutable session inputs plus a cancellation flag and telemetry sink)
//! and runs until its deadline elapses or cancellation is signaled, then
//! tears down any in-flight work and returns. The worker runtime emits the
//! terminal event exactly once after the driver returns.

use crate::relay::{IdentityPool, RelayDescriptor, RelayProtocol};
use crate::target::TargetNode;
use crate::telemetry::TelemetrySink;
use crate::Result;
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Metadata about a driver, registered once at process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverDescriptor {
    /// Stable identifier used by the control channel
    pub id: &'static str,
    /// Human-readable name
    pub name: &'static str,
    /// Description of the traffic pattern
    pub description: &'static str,
    /// Relay protocols this driver can tunnel through
    pub supported: &'static [RelayProtocol],
}

/// Immutable inputs plus the live handles a driver runs with.
///
/// Relay list and identity pool are shared by reference and must never be
/// mutated by a driver; all per-attempt state (connections, payloads) is
/// owned by the driver exclusively.
#[derive(Debug, Clone)]
pub struct DriverContext {
    pub target: TargetNode,
    pub relays: Arc<Vec<RelayDescriptor>>,
    pub identities: Arc<IdentityPool>,
    pub duration: Duration,
    pub packet_delay: Duration,
    pub packet_size: usize,
    pub deadline: Instant,
    pub running: Arc<AtomicBool>,
    pub sink: TelemetrySink,
}

impl DriverContext {
    /// False once cancellation has been signaled.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// True while neither the deadline nor cancellation has fired.
    pub fn should_continue(&self) -> bool {
        self.is_running() && Instant::now() < self.deadline
    }

    /// Tick cadence, clamped away from zero.
    pub fn tick_interval(&self) -> Duration {
        self.packet_delay.max(Duration::from_millis(1))
    }

    /// Uniform random relay draw, with replacement. `None` when the
    /// session runs without relays (direct connections).
    pub fn draw_relay<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<RelayDescriptor> {
        if self.relays.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0..self.relays.len());
        Some(self.relays[idx].clone())
    }

    /// Uniform random identity draw, with replacement.
    pub fn draw_identity<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<String> {
        self.identities.draw(rng).map(str::to_string)
    }
}

/// Driver trait that all traffic patterns implement.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Static metadata for this driver
    fn descriptor(&self) -> &DriverDescriptor;

    /// Run the traffic pattern until deadline or cancellation.
    ///
    /// Per-attempt failures must be folded into telemetry, never
    /// propagated; an `Err` return is reserved for invalid static
    /// parameters detected before any attempt is made.
    async fn run(&self, ctx: DriverContext) -> Result<()>;
}

/// Fixed mapping from driver identifier to driver instance.
///
/// Populated at process start, read-only for the remainder of the process
/// lifetime. Registration order is preserved for discovery.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: Vec<Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.push(driver);
    }

    /// Resolve a driver by id.
    pub fn resolve(&self, id: &str) -> Option<Arc<dyn Driver>> {
        self.drivers
            .iter()
            .find(|d| d.descriptor().id == id)
            .cloned()
    }

    /// All registered descriptors, in registration order.
    pub fn list(&self) -> Vec<&DriverDescriptor> {
        self.drivers.iter().map(|d| d.descriptor()).collect()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}
