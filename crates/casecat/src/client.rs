//! HTTP clients used for case playback.
//!
//! One client is created per run and shared by every case. Two flavours exist:
//!
//! - [`DirectClient`] talks to the target through a plain pooled connector and
//!   never follows redirects.
//! - [`ProxyProtocolClient`] opens a fresh connection per request and writes a
//!   PROXY protocol v1 header announcing a spoofed client before the HTTP
//!   exchange starts.

use crate::error::ClientError;
use crate::proxy_protocol::{ProxyHeader, ServerAddr};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::ext::ReasonPhrase;
use hyper::header::{HeaderValue, HOST, SET_COOKIE};
use hyper::{HeaderMap, Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// Overall ceiling applied by a fresh client until a case overrides it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Streaming response body, read by the expectation.
pub type ResponseBody = BoxBody<Bytes, BoxError>;

/// Capability needed to play cases: send a request, get a response.
///
/// The timeout is state on the client rather than a per-call argument, so a
/// client must not be shared by concurrently running cases.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Execute one request. The request is borrowed so repeats can reuse it.
    async fn execute(&self, request: &Request<Bytes>) -> Result<CaseResponse, ClientError>;

    /// Set the ceiling for subsequent requests. `Duration::ZERO` removes it.
    fn set_timeout(&mut self, timeout: Duration);
}

/// A response as seen by match rules.
pub struct CaseResponse {
    status_line: String,
    headers: HeaderMap,
    body: ResponseBody,
    deadline: Option<Deadline>,
}

impl CaseResponse {
    pub fn new(status_line: impl Into<String>, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            status_line: status_line.into(),
            headers,
            body,
            deadline: None,
        }
    }

    /// Response with an in-memory body.
    pub fn full(
        status_line: impl Into<String>,
        headers: HeaderMap,
        body: impl Into<Bytes>,
    ) -> Self {
        let body = Full::new(body.into())
            .map_err(|never: Infallible| -> BoxError { match never {} })
            .boxed();
        Self::new(status_line, headers, body)
    }

    pub fn from_hyper(response: Response<Incoming>) -> Self {
        let status_line = status_line(
            response.status(),
            response.extensions().get::<ReasonPhrase>(),
        );
        let (parts, body) = response.into_parts();
        let body = body.map_err(|e| Box::new(e) as BoxError).boxed();
        Self::new(status_line, parts.headers, body)
    }

    /// Status code and reason phrase, e.g. `"200 OK"`.
    pub fn status_line(&self) -> &str {
        &self.status_line
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of the named header, or `""` when absent.
    pub fn header(&self, name: &str) -> String {
        self.headers
            .get(name)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .unwrap_or_default()
    }

    /// Parsed `Set-Cookie` headers, in order. Malformed entries are skipped.
    pub fn set_cookies(&self) -> Vec<SetCookie> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| SetCookie::parse(&String::from_utf8_lossy(v.as_bytes())))
            .collect()
    }

    /// Every parsed `Set-Cookie` in normalized form, joined with `", "`.
    pub fn set_cookie_header(&self) -> String {
        self.set_cookies()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `(name, value)` pairs from `Set-Cookie` headers, in order.
    pub fn cookies(&self) -> Vec<(String, String)> {
        self.set_cookies()
            .into_iter()
            .map(|c| (c.name, c.value))
            .collect()
    }

    /// Read the whole body into memory, within what is left of the request
    /// timeout.
    pub async fn read_body(self) -> Result<Bytes, BoxError> {
        let collect = self.body.collect();
        let collected = match self.deadline {
            Some(deadline) => timeout_at(deadline.at, collect)
                .await
                .map_err(|_| ClientError::Timeout(deadline.limit))??,
            None => collect.await?,
        };
        Ok(collected.to_bytes())
    }

    fn bounded_by(mut self, deadline: Option<Deadline>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// A cookie from a `Set-Cookie` header.
///
/// Attribute names are matched case-insensitively and unknown attributes are
/// dropped, so `Display` gives a normalized `name=value; Attr=...` form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub expires: Option<String>,
    /// Seconds; zero or negative values are kept as 0 (delete now).
    pub max_age: Option<i64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<&'static str>,
}

impl SetCookie {
    pub fn parse(header: &str) -> Option<Self> {
        let mut parts = header.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return None;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);

        let mut cookie = SetCookie {
            name: name.to_string(),
            value: value.to_string(),
            ..Default::default()
        };

        for attr in parts.map(str::trim).filter(|a| !a.is_empty()) {
            let (key, val) = match attr.split_once('=') {
                Some((key, val)) => (key.trim(), val.trim()),
                None => (attr, ""),
            };
            match key.to_ascii_lowercase().as_str() {
                "path" => cookie.path = Some(val.to_string()),
                "domain" => cookie.domain = Some(val.trim_start_matches('.').to_string()),
                "expires" => cookie.expires = Some(val.to_string()),
                "max-age" => {
                    if let Ok(secs) = val.parse::<i64>() {
                        cookie.max_age = Some(secs.max(0));
                    }
                }
                "httponly" => cookie.http_only = true,
                "secure" => cookie.secure = true,
                "samesite" => {
                    cookie.same_site = match val.to_ascii_lowercase().as_str() {
                        "lax" => Some("Lax"),
                        "strict" => Some("Strict"),
                        "none" => Some("None"),
                        _ => None,
                    }
                }
                _ => {}
            }
        }

        Some(cookie)
    }
}

impl fmt::Display for SetCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if let Some(path) = self.path.as_deref().filter(|p| !p.is_empty()) {
            write!(f, "; Path={path}")?;
        }
        if let Some(domain) = self.domain.as_deref().filter(|d| !d.is_empty()) {
            write!(f, "; Domain={domain}")?;
        }
        if let Some(expires) = self.expires.as_deref().filter(|e| !e.is_empty()) {
            write!(f, "; Expires={expires}")?;
        }
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={max_age}")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if let Some(same_site) = self.same_site {
            write!(f, "; SameSite={same_site}")?;
        }
        Ok(())
    }
}

fn status_line(status: StatusCode, reason: Option<&ReasonPhrase>) -> String {
    let reason = match reason {
        Some(reason) => String::from_utf8_lossy(reason.as_bytes()).into_owned(),
        None => status.canonical_reason().unwrap_or_default().to_string(),
    };
    format!("{} {}", status.as_str(), reason)
        .trim_end()
        .to_string()
}

/// Copy a borrowed request into one hyper can send.
fn outbound(request: &Request<Bytes>, uri: Uri) -> Request<Full<Bytes>> {
    let mut out = Request::new(Full::new(request.body().clone()));
    *out.method_mut() = request.method().clone();
    *out.uri_mut() = uri;
    *out.version_mut() = request.version();
    *out.headers_mut() = request.headers().clone();
    out
}

/// Point by which a whole request, body included, has to be done.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    limit: Duration,
}

impl Deadline {
    fn starting_now(timeout: Option<Duration>) -> Option<Self> {
        timeout.map(|limit| Self {
            at: Instant::now() + limit,
            limit,
        })
    }
}

/// Run `exchange` under `deadline` and hand the deadline on to the response,
/// so reading the body stays bounded by the same timeout.
async fn within<F>(deadline: Option<Deadline>, exchange: F) -> Result<CaseResponse, ClientError>
where
    F: Future<Output = Result<CaseResponse, ClientError>>,
{
    let response = match deadline {
        Some(deadline) => timeout_at(deadline.at, exchange)
            .await
            .map_err(|_| ClientError::Timeout(deadline.limit))??,
        None => exchange.await?,
    };
    Ok(response.bounded_by(deadline))
}

fn timeout_from(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}

/// Plain HTTP/1.1 client. hyper never follows redirects, so 3xx responses are
/// matched as received.
pub struct DirectClient {
    inner: Client<HttpConnector, Full<Bytes>>,
    timeout: Option<Duration>,
}

impl DirectClient {
    pub fn new() -> Self {
        let inner = Client::builder(TokioExecutor::new()).build_http();
        Self {
            inner,
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

impl Default for DirectClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for DirectClient {
    async fn execute(&self, request: &Request<Bytes>) -> Result<CaseResponse, ClientError> {
        let req = outbound(request, request.uri().clone());
        within(Deadline::starting_now(self.timeout), async {
            let response = self
                .inner
                .request(req)
                .await
                .map_err(|e| ClientError::Request(e.to_string()))?;
            Ok(CaseResponse::from_hyper(response))
        })
        .await
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout_from(timeout);
    }
}

/// Client that prefixes every connection with a PROXY protocol v1 header.
///
/// The header's source is the configured client IP with the real local port of
/// the connection; its destination is the configured server address, whose
/// port defaults to the target's port.
pub struct ProxyProtocolClient {
    client_ip: Ipv4Addr,
    server: ServerAddr,
    timeout: Option<Duration>,
}

impl ProxyProtocolClient {
    pub fn new(client_ip: Ipv4Addr, server: ServerAddr) -> Self {
        Self {
            client_ip,
            server,
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }

    async fn exchange(&self, request: &Request<Bytes>) -> Result<CaseResponse, ClientError> {
        let authority = request
            .uri()
            .authority()
            .ok_or_else(|| ClientError::Request(format!("no host in '{}'", request.uri())))?
            .clone();
        let target = format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80));

        let mut stream = TcpStream::connect(&target)
            .await
            .map_err(|e| ClientError::Connect(target.clone(), e))?;
        let local_port = stream
            .local_addr()
            .map(|addr: SocketAddr| addr.port())
            .map_err(|e| ClientError::Connect(target.clone(), e))?;
        let target_port = authority.port_u16().unwrap_or(80);

        let header = ProxyHeader::spoofed(self.client_ip, local_port, &self.server, target_port);
        debug!("Sending proxy protocol header: {}", header.to_string().trim_end());
        stream
            .write_all(header.to_string().as_bytes())
            .await
            .map_err(ClientError::ProxyHeader)?;

        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(ClientError::Handshake)?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Connection to {} closed with error: {}", target, e);
            }
        });

        // Origin-form on the wire, so the Host header carries the authority.
        let path = request
            .uri()
            .path_and_query()
            .cloned()
            .map(Uri::from)
            .unwrap_or_else(|| Uri::from_static("/"));
        let mut req = outbound(request, path);
        if !req.headers().contains_key(HOST) {
            if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
                req.headers_mut().insert(HOST, host);
            }
        }

        let response = sender
            .send_request(req)
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;
        Ok(CaseResponse::from_hyper(response))
    }
}

#[async_trait]
impl HttpClient for ProxyProtocolClient {
    async fn execute(&self, request: &Request<Bytes>) -> Result<CaseResponse, ClientError> {
        within(Deadline::starting_now(self.timeout), self.exchange(request)).await
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout_from(timeout);
    }
}
