//! Error types for case loading, HTTP transport and the relay.

use std::io;
use std::path::PathBuf;

/// An invalid run-wide setting.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No target address given (--addr)")]
    MissingAddr,

    #[error("Invalid {0} '{1}': {2}")]
    InvalidAddr(&'static str, String, String),
}

/// A problem with the case file or with a request described in it.
///
/// These are configuration faults: loading errors abort the whole run before
/// any request goes out.
#[derive(Debug, thiserror::Error)]
pub enum CaseError {
    #[error("Failed to read case file {}: {}", .0.display(), .1)]
    Read(PathBuf, #[source] io::Error),

    #[error("Invalid case file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid match rules:\n  {}", .0.join("\n  "))]
    InvalidRules(Vec<String>),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// A transport failure while executing one request.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to connect to {0}: {1}")]
    Connect(String, #[source] io::Error),

    #[error("Failed to write proxy protocol header: {0}")]
    ProxyHeader(#[source] io::Error),

    #[error("HTTP handshake failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// A fatal relay error. Per-connection failures are logged, not returned.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Failed to bind {0}: {1}")]
    Bind(String, #[source] io::Error),
}
