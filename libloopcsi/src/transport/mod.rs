//! Unix-socket transport layer for CSI messages.
//!
//! This module provides [`CsiClient`](client::CsiClient) and
//! [`CsiServer`](server::CsiServer) that exchange JSON-encoded
//! [`CsiMessage`](crate::CsiMessage) values, one request and one response
//! per connection.

pub mod client;
pub mod server;

use std::path::PathBuf;

use crate::error::CsiError;

/// Upper bound on a single encoded message.
pub const MAX_MESSAGE_SIZE: u64 = 16 * 1024 * 1024;

/// Endpoint the node plugin listens on when nothing else is configured.
pub const DEFAULT_ENDPOINT: &str = "unix:///csi/csi.sock";

/// Resolve an endpoint URL such as `unix:///csi/csi.sock` into a socket path.
///
/// A bare path is accepted as-is.  `tcp://` endpoints are rejected because
/// the plugin only ever listens on a local socket.
pub fn parse_endpoint(endpoint: &str) -> Result<PathBuf, CsiError> {
    let lower = endpoint.to_ascii_lowercase();
    let path = if lower.starts_with("unix://") {
        &endpoint["unix://".len()..]
    } else if lower.starts_with("tcp://") {
        return Err(CsiError::InvalidArgument(format!(
            "tcp endpoints are not supported: {endpoint}"
        )));
    } else if endpoint.contains("://") {
        return Err(CsiError::InvalidArgument(format!(
            "unsupported endpoint scheme: {endpoint}"
        )));
    } else {
        endpoint
    };

    if path.is_empty() {
        return Err(CsiError::InvalidArgument(format!(
            "endpoint has no socket path: {endpoint}"
        )));
    }
    Ok(PathBuf::from(path))
}
