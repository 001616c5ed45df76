//! Attack drivers for the Surge harness
//!
//! Each driver implements one traffic pattern behind the
//! [`surge_core::Driver`] trait:
//!
//! - [`http::HttpFloodDriver`] — request-per-tick HTTP flood
//! - [`http::HttpBypassDriver`] — persistent browser-mimicking bot pool
//! - [`http::HttpSlowlorisDriver`] — drip-fed partial requests that hold
//!   connections open
//! - [`tcp::TcpFloodDriver`] — tunneled TCP connect/write flood
//! - [`game::MinecraftPingDriver`] — server-list-ping spam
//!
//! [`builtin`] assembles the fixed registry the orchestrator validates
//! session requests against.

pub mod game;
pub mod http;
pub mod tcp;

mod util;

use std::sync::Arc;
use surge_core::DriverRegistry;

pub use game::MinecraftPingDriver;
pub use http::{HttpBypassDriver, HttpFloodDriver, HttpSlowlorisDriver};
pub use tcp::TcpFloodDriver;

/// The compiled-in driver set, in discovery order.
pub fn builtin() -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    registry.register(Arc::new(HttpFloodDriver::new()));
    registry.register(Arc::new(HttpBypassDriver::new()));
    registry.register(Arc::new(HttpSlowlorisDriver::new()));
    registry.register(Arc::new(TcpFloodDriver::new()));
    registry.register(Arc::new(MinecraftPingDriver::new()));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use surge_core::RelayProtocol;

    #[test]
    fn test_builtin_registry_ids_and_order() {
        let registry = builtin();
        let ids: Vec<_> = registry.list().iter().map(|d| d.id).collect();
        assert_eq!(
            ids,
            vec![
                "http_flood",
                "http_bypass",
                "http_slowloris",
                "tcp_flood",
                "minecraft_ping"
            ]
        );
    }

    #[test]
    fn test_builtin_supported_protocols() {
        let registry = builtin();
        let all = [
            RelayProtocol::Http,
            RelayProtocol::Https,
            RelayProtocol::Socks4,
            RelayProtocol::Socks5,
        ];
        let socks = [RelayProtocol::Socks4, RelayProtocol::Socks5];

        for (id, expected) in [
            ("http_flood", &all[..]),
            ("http_bypass", &all[..]),
            ("http_slowloris", &all[..]),
            ("tcp_flood", &socks[..]),
            ("minecraft_ping", &socks[..]),
        ] {
            let driver = registry.resolve(id).unwrap();
            assert_eq!(driver.descriptor().supported, expected, "{id}");
        }
    }
}
