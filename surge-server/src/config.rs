//! Server configuration
//!
//! TOML file with tolerant loading: any read or parse failure logs a
//! warning and falls back to the defaults, so a missing or broken config
//! never prevents startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Relay directory file, one relay per line
    pub relays_file: PathBuf,
    /// Identity (user agent) file, one entry per line
    pub identities_file: PathBuf,
    pub listen_port: u16,
    /// Origin allowed by CORS and accepted on the control channel
    pub allowed_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            relays_file: PathBuf::from("data/proxies.txt"),
            identities_file: PathBuf::from("data/uas.txt"),
            listen_port: 3000,
            allowed_origin: "http://localhost:5173".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Config unreadable, using defaults");
                return Self::default();
            }
        };
        match toml::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Config invalid, using defaults");
                Self::default()
            }
        }
    }
}
