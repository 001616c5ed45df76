//! Error types for Surge

use thiserror::Error;

/// Result type alias for Surge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Surge
#[derive(Error, Debug)]
pub enum Error {
    /// Network I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tunnel establishment error from the transport adapter
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// A single request failed inside a driver
    #[error("request failed: {0}")]
    Request(String),

    /// Invalid parameter in a session request
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// The requested driver id is not registered
    #[error("unsupported attack method: {0}")]
    DriverNotFound(String),

    /// No relay in the directory matches the driver's supported protocols
    #[error("no relays match the selected attack method")]
    NoMatchingRelays,

    /// The session already has an active worker attached
    #[error("session already has an active worker")]
    SessionBusy,

    /// The session id is unknown to the orchestrator
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Execution failed
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

impl Error {
    /// Create an invalid parameter error
    pub fn invalid_parameter<S: Into<String>>(name: S, reason: S) -> Self {
        Error::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// User-reported rejections: reported synchronously to the caller,
    /// no worker is spawned and no state changes.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::InvalidParameter { .. }
                | Error::DriverNotFound(_)
                | Error::NoMatchingRelays
                | Error::SessionBusy
        )
    }
}

/// Typed cause for a failed tunnel establishment.
///
/// Surfaced to drivers by the transport adapter; drivers decide per-variant
/// whether to skip the tick or abort (current policy: always skip).
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Hostname did not resolve
    #[error("dns lookup failed for {0}")]
    Dns(String),

    /// The relay (or target, for direct connections) refused the connection
    #[error("connection refused: {0}")]
    Refused(String),

    /// The relay rejected the supplied credentials
    #[error("relay rejected credentials")]
    Auth,

    /// Connection establishment timed out
    #[error("connect timed out")]
    Timeout,

    /// The relay protocol is not handled by the transport adapter
    #[error("unsupported relay protocol: {0}")]
    Unsupported(String),

    /// Proxied client could not be constructed
    #[error("relay client setup failed: {0}")]
    Setup(String),

    /// Other I/O error during tunnel setup
    #[error("tunnel I/O error: {0}")]
    Io(#[from] std::io::Error),
}
