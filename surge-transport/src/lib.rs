//! Transport adapter for the Surge harness
//!
//! Normalizes relay descriptors into two uniform interfaces:
//!
//! - [`stream::open_stream`] — a tunneled (or direct) TCP byte stream for
//!   stream-oriented drivers,
//! - [`http::http_client`] — a proxied HTTP client for request-oriented
//!   drivers.
//!
//! No retry policy lives at this layer; a failed establishment surfaces as
//! a typed [`surge_core::ConnectError`] and the driver decides what to do.

pub mod http;
pub mod stream;

pub use http::{http_client, proxy_url};
pub use stream::{open_stream, CONNECT_TIMEOUT};
