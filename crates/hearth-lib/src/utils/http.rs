//! Shared HTTP plumbing: client construction, timeouts and header handling.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;

/// User-Agent string for all requests made by the core
pub const USER_AGENT: &str = concat!("hearth-launcher/", env!("CARGO_PKG_VERSION"));

/// Version listings, manifests and transfer-plan lookups
pub const LISTING_TIMEOUT: Duration = Duration::from_secs(10);
/// Existence and latency probes
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Longest silence tolerated between two chunks of a transfer
pub const STALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Build a client for metadata and transfers.
///
/// No total timeout on the client; metadata calls set a per-request timeout.
pub fn build_client() -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
}

/// Convert custom mirror headers into a `HeaderMap`, rejecting the first
/// unusable name or value.
pub fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, String> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| format!("invalid header name '{}'", name))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| format!("invalid value for header '{}'", name))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Lenient variant used at request time: bad entries are skipped with a warning.
pub fn header_map_lossy(headers: &BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        ) {
            (Ok(n), Ok(v)) => {
                map.insert(n, v);
            }
            _ => log::warn!("[http] Skipping unusable custom header '{}'", name),
        }
    }
    map
}

/// Describe a transport error for logs and `Unreachable` messages.
pub fn describe_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timed out ({})", err)
    } else if err.is_connect() {
        format!("connection failed ({})", err)
    } else {
        err.to_string()
    }
}
