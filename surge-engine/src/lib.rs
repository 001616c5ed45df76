//! Surge engine
//!
//! Two layers sit between the control channel and the drivers:
//!
//! - [`runtime`] — spawns one driver in an isolated tokio task, contains
//!   panics, aggregates throughput, and guarantees exactly one terminal
//!   event per worker lifetime.
//! - [`session`] — at most one live worker per session; validates start
//!   requests, wires worker events to the session's outbound channel, and
//!   releases the slot when the worker terminates.

pub mod runtime;
pub mod session;

pub use runtime::{WorkerHandle, WorkerInputs, WorkerRuntime};
pub use session::{
    RelaySource, SessionEvent, SessionOrchestrator, SessionParameters, SessionStart,
};
