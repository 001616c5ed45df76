//! HTTP bypass driver
//!
//! Persistent per-relay pool: one long-lived bot per relay, each with
//! browser-like headers drawn once at startup, cycling requests against
//! the target until cancellation or deadline. Teardown drains every bot
//! before the driver returns.

use crate::util::{attempt_err, attempt_ok};
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use surge_core::{
    Driver, DriverContext, DriverDescriptor, RelayDescriptor, RelayProtocol, Result, TelemetrySink,
};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::debug;

static DESCRIPTOR: DriverDescriptor = DriverDescriptor {
    id: "http_bypass",
    name: "HTTP Bypass",
    description: "Mimics real browser requests to bypass protections.",
    supported: &[
        RelayProtocol::Http,
        RelayProtocol::Https,
        RelayProtocol::Socks4,
        RelayProtocol::Socks5,
    ],
};

const ACCEPT_CANDIDATES: &[&str] = &[
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.9",
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,image/*;q=0.8,application/signed-exchange;v=b3;q=0.9",
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.9",
];

const LANGUAGE_CANDIDATES: &[&str] = &[
    "en-US,en;q=0.5",
    "es-ES,en;q=0.5",
    "fr-FR,en;q=0.5",
    "de-DE,en;q=0.5",
    "it-IT,en;q=0.5",
    "pt-BR,en;q=0.5",
];

const ENCODING_CANDIDATES: &[&str] = &[
    "gzip, deflate, br",
    "gzip, deflate",
    "gzip",
    "deflate, br",
    "deflate",
    "br",
];

/// Pause after a failed cycle so a dead relay does not spin the bot.
const FAILURE_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Default)]
pub struct HttpBypassDriver;

impl HttpBypassDriver {
    pub fn new() -> Self {
        Self
    }
}

/// Browser-like header set, each value drawn independently at random.
fn mimic_headers<R: Rng + ?Sized>(rng: &mut R) -> HeaderMap {
    fn pick<R: Rng + ?Sized>(rng: &mut R, candidates: &'static [&'static str]) -> HeaderValue {
        HeaderValue::from_static(candidates[rng.gen_range(0..candidates.len())])
    }

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, pick(rng, ACCEPT_CANDIDATES));
    headers.insert(ACCEPT_LANGUAGE, pick(rng, LANGUAGE_CANDIDATES));
    headers.insert(ACCEPT_ENCODING, pick(rng, ENCODING_CANDIDATES));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));
    headers.insert(
        "Upgrade-Insecure-Requests",
        HeaderValue::from_static("1"),
    );
    headers
}

async fn bot_cycle(
    sink: TelemetrySink,
    relay: Option<RelayDescriptor>,
    url: String,
    user_agent: Option<String>,
    headers: HeaderMap,
    running: Arc<AtomicBool>,
    deadline: Instant,
) {
    let client = match surge_transport::http_client(
        relay.as_ref(),
        user_agent.as_deref(),
        Some(headers),
        true,
    ) {
        Ok(client) => client,
        Err(e) => {
            sink.failure(attempt_err(
                "request_failed",
                relay.as_ref(),
                &url,
                &e.to_string(),
            ));
            return;
        }
    };

    while running.load(Ordering::Relaxed) && Instant::now() < deadline {
        match client.get(&url).send().await {
            Ok(_) => sink.success(attempt_ok("request_success", relay.as_ref(), &url)),
            Err(e) => {
                sink.failure(attempt_err(
                    "request_failed",
                    relay.as_ref(),
                    &url,
                    &e.to_string(),
                ));
                tokio::time::sleep(FAILURE_BACKOFF).await;
            }
        }
    }
}

#[async_trait]
impl Driver for HttpBypassDriver {
    fn descriptor(&self) -> &DriverDescriptor {
        &DESCRIPTOR
    }

    async fn run(&self, ctx: DriverContext) -> Result<()> {
        let url = ctx.target.http_url();
        let mut pool = JoinSet::new();

        // One bot per relay; a relay-less session gets a single direct bot.
        let slots: Vec<Option<RelayDescriptor>> = if ctx.relays.is_empty() {
            vec![None]
        } else {
            ctx.relays.iter().cloned().map(Some).collect()
        };
        let bots = slots.len();
        for relay in slots {
            let (ua, headers) = {
                let mut rng = rand::thread_rng();
                (ctx.draw_identity(&mut rng), mimic_headers(&mut rng))
            };
            pool.spawn(bot_cycle(
                ctx.sink.clone(),
                relay,
                url.clone(),
                ua,
                headers,
                ctx.running.clone(),
                ctx.deadline,
            ));
        }
        debug!(bots, "bypass pool started");

        // Bots observe the deadline and the cancellation flag themselves;
        // wait for every one to drain before reporting completion.
        while pool.join_next().await.is_some() {}
        debug!(total = ctx.sink.total(), "bypass pool drained");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_mimic_headers_complete() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let headers = mimic_headers(&mut rng);
            let accept = headers.get(ACCEPT).unwrap().to_str().unwrap();
            assert!(ACCEPT_CANDIDATES.contains(&accept));
            let lang = headers.get(ACCEPT_LANGUAGE).unwrap().to_str().unwrap();
            assert!(LANGUAGE_CANDIDATES.contains(&lang));
            let enc = headers.get(ACCEPT_ENCODING).unwrap().to_str().unwrap();
            assert!(ENCODING_CANDIDATES.contains(&enc));
            assert_eq!(headers.get("Connection").unwrap(), "keep-alive");
        }
    }

    #[test]
    fn test_descriptor() {
        assert_eq!(HttpBypassDriver::new().descriptor().id, "http_bypass");
    }
}
