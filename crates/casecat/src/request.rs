//! Outbound request description (`"req"` in a case).

use crate::error::CaseError;
use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue, HOST};
use hyper::{Method, Request};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// How to build the request sent for a case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RequestSpec {
    /// Client timeout in whole seconds; 0 disables it.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub timeout: i64,

    /// Explicit method. Empty means GET, or POST when a body is present.
    #[serde(default)]
    pub method: String,

    /// Path and query appended to the target address. Should start with `/`.
    #[serde(default)]
    pub url: String,

    /// Value forced into the `Host` header, for virtual-host testing.
    #[serde(default)]
    pub host: String,

    /// Per-case source address hint. Parsed but not used by the clients.
    #[serde(rename = "realAddr", default, skip_serializing_if = "String::is_empty")]
    pub real_addr: String,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub body: String,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl RequestSpec {
    /// Timeout as applied to the shared client. Zero or negative disables it.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(0) as u64)
    }

    /// Method after defaults: explicit method, else POST with a body, else GET.
    pub fn effective_method(&self) -> &str {
        if !self.method.is_empty() {
            &self.method
        } else if !self.body.is_empty() {
            "POST"
        } else {
            "GET"
        }
    }

    /// Build a fresh request against `target_addr` (`host:port`).
    pub fn build(&self, target_addr: &str) -> Result<Request<Bytes>, CaseError> {
        let method = Method::from_bytes(self.effective_method().as_bytes())
            .map_err(|e| CaseError::InvalidRequest(format!("method '{}': {e}", self.method)))?;
        let url = format!("http://{}{}", target_addr, self.url);

        let mut builder = Request::builder().method(method).uri(url.as_str());

        if let Some(headers) = builder.headers_mut() {
            if !self.host.is_empty() {
                let host = HeaderValue::from_str(&self.host).map_err(|e| {
                    CaseError::InvalidRequest(format!("host '{}': {e}", self.host))
                })?;
                headers.insert(HOST, host);
            }

            for (name, value) in &self.headers {
                let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    CaseError::InvalidRequest(format!("header name '{name}': {e}"))
                })?;
                let header_value = HeaderValue::from_str(value).map_err(|e| {
                    CaseError::InvalidRequest(format!("header '{name}' value '{value}': {e}"))
                })?;
                headers.append(header_name, header_value);
            }
        }

        builder
            .body(Bytes::from(self.body.clone()))
            .map_err(|e| CaseError::InvalidRequest(format!("url '{url}': {e}")))
    }
}
