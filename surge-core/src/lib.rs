//! Surge core library
//!
//! This crate provides the fundamental traits, types, and error handling
//! for the Surge load-generation harness: relay descriptors and their
//! normalization rules, the identity pool, target parsing, the driver
//! trait with its registry, and the telemetry types exchanged between a
//! running worker and its supervisor.

pub mod driver;
pub mod error;
pub mod relay;
pub mod target;
pub mod telemetry;

// Re-export commonly used types
pub use driver::{Driver, DriverContext, DriverDescriptor, DriverRegistry};
pub use error::{ConnectError, Error, Result};
pub use relay::{IdentityPool, RelayDescriptor, RelayProtocol, RelaySpec};
pub use target::TargetNode;
pub use telemetry::{
    LogEntry, TelemetrySink, TelemetrySnapshot, WorkerCounters, WorkerEvent, WorkerOutcome,
};
