//! Proxied HTTP clients
//!
//! Request-oriented drivers get a `reqwest::Client` routed through a
//! relay. Certificate validation is disabled on purpose: the harness
//! talks to arbitrary targets, often through intercepting relays.

use reqwest::header::HeaderMap;
use reqwest::redirect::Policy;
use std::time::Duration;
use surge_core::{ConnectError, RelayDescriptor, RelayProtocol};

/// Default per-request budget.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Redirect ceiling for drivers that follow redirects.
const MAX_REDIRECTS: usize = 5;

/// Proxy URL for a relay, credentials included when present.
///
/// SOCKS5 uses the `socks5h` scheme so the relay performs DNS resolution;
/// the target hostname never resolves locally.
pub fn proxy_url(relay: &RelayDescriptor) -> String {
    let scheme = match relay.protocol {
        RelayProtocol::Http => "http",
        RelayProtocol::Https => "https",
        RelayProtocol::Socks4 => "socks4",
        RelayProtocol::Socks5 => "socks5h",
    };
    match (&relay.username, &relay.password) {
        (Some(user), Some(pass)) => {
            format!("{scheme}://{user}:{pass}@{}:{}", relay.host, relay.port)
        }
        (Some(user), None) => format!("{scheme}://{user}@{}:{}", relay.host, relay.port),
        _ => format!("{scheme}://{}:{}", relay.host, relay.port),
    }
}

/// Build an HTTP client tunneled through `relay`, or a direct client
/// when `relay` is `None`.
///
/// `follow_redirects` distinguishes the fire-and-forget flood pattern
/// (no redirects) from browser-mimicking drivers.
pub fn http_client(
    relay: Option<&RelayDescriptor>,
    user_agent: Option<&str>,
    default_headers: Option<HeaderMap>,
    follow_redirects: bool,
) -> Result<reqwest::Client, ConnectError> {
    let mut builder = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(REQUEST_TIMEOUT)
        .redirect(if follow_redirects {
            Policy::limited(MAX_REDIRECTS)
        } else {
            Policy::none()
        });

    if let Some(relay) = relay {
        let proxy = reqwest::Proxy::all(proxy_url(relay))
            .map_err(|e| ConnectError::Setup(e.to_string()))?;
        builder = builder.proxy(proxy);
    }
    if let Some(ua) = user_agent {
        builder = builder.user_agent(ua.to_string());
    }
    if let Some(headers) = default_headers {
        builder = builder.default_headers(headers);
    }

    builder.build().map_err(|e| ConnectError::Setup(e.to_string()))
}
