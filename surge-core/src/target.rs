//! Target parsing
//!
//! A session target is user input: a full URL (`http://host:8080/path`),
//! a `host:port` pair, or a bare host. Drivers pick the pieces they need.

use crate::{Error, Result};
use url::Url;

/// Parsed target endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetNode {
    raw: String,
    scheme: Option<String>,
    host: String,
    port: u16,
    explicit_port: bool,
    path: String,
    query: Option<String>,
}

impl TargetNode {
    /// Parse a user-provided target. Accepts a URL with an http/https
    /// scheme, `host:port`, or a bare host (port defaults to 80).
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::invalid_parameter("target", "must not be empty"));
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            let url = Url::parse(raw)
                .map_err(|e| Error::invalid_parameter("target", &e.to_string()))?;
            let host = url
                .host_str()
                .ok_or_else(|| Error::invalid_parameter("target", "missing host"))?
                .to_string();
            let explicit_port = url.port().is_some();
            let port = url.port_or_known_default().unwrap_or(80);
            return Ok(TargetNode {
                raw: raw.to_string(),
                scheme: Some(url.scheme().to_string()),
                host,
                port,
                explicit_port,
                path: url.path().to_string(),
                query: url.query().map(str::to_string),
            });
        }

        // host:port or bare host
        let (host, port, explicit_port) = match raw.rsplit_once(':') {
            Some((host, port_str)) if !host.is_empty() => {
                let port = port_str.parse::<u16>().map_err(|_| {
                    Error::invalid_parameter("target", "port must be a number in [1, 65535]")
                })?;
                (host.to_string(), port, true)
            }
            _ => (raw.to_string(), 80, false),
        };

        Ok(TargetNode {
            raw: raw.to_string(),
            scheme: None,
            host,
            port,
            explicit_port,
            path: String::new(),
            query: None,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the user spelled out a port (as opposed to a default)
    pub fn has_explicit_port(&self) -> bool {
        self.explicit_port
    }

    /// `host:port` form for stream-oriented drivers
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL form for HTTP drivers. Targets without a scheme default to
    /// https, matching how operators usually enter bare hostnames.
    pub fn http_url(&self) -> String {
        match self.scheme {
            Some(_) => self.raw.clone(),
            None => format!("https://{}", self.raw),
        }
    }
}
