//! Device HTTP API: transport, payload normalization and the client

mod client;
pub mod payload;
mod transport;

pub use client::DeviceClient;
pub use transport::{normalize_base_url, parse_base_url, HttpTransport, RawResponse, Transport};
