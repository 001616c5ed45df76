//! Shared helpers for driver implementations

use rand::distributions::{Alphanumeric, DistString};
use rand::Rng;
use surge_core::{LogEntry, RelayDescriptor};

/// Random opaque payload of `len` alphanumeric bytes.
pub fn random_payload<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    Alphanumeric.sample_string(rng, len)
}

/// Relay label for log entries; sessions without relays connect direct.
pub fn relay_label(relay: Option<&RelayDescriptor>) -> String {
    relay.map_or_else(|| "direct".to_string(), |r| r.to_string())
}

/// Success log entry for one attempt through `relay`.
pub fn attempt_ok(key: &str, relay: Option<&RelayDescriptor>, target: &str) -> LogEntry {
    LogEntry::new(key)
        .with("relay", relay_label(relay))
        .with("target", target)
}

/// Failure log entry for one attempt through `relay`.
pub fn attempt_err(
    key: &str,
    relay: Option<&RelayDescriptor>,
    target: &str,
    error: &str,
) -> LogEntry {
    attempt_ok(key, relay, target).with("error", error)
}
