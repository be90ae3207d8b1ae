// Media HTTP client
//
// Wraps `reqwest::Client` with the three request shapes the pipeline needs:
// a cheap reachability probe, a bounded still-image fetch, and a streaming
// clip download. Every request carries an explicit deadline; nothing here
// retries -- retry policy belongs to the caller.

use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, RANGE};
use reqwest::{Method, StatusCode};
use tracing::{debug, trace};
use url::Url;

use crate::auth::Credentials;
use crate::endpoints::Endpoints;
use crate::error::Error;
use crate::transport::TransportConfig;

/// Which verb answered a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    Head,
    /// `GET` with `Range: bytes=0-0`, used when the backend refuses `HEAD`.
    RangedGet,
}

/// What a backend said when probed. Any HTTP answer is a `ProbeResponse`;
/// only transport failures are errors.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    /// Lowercased MIME essence (`image/jpeg`), parameters stripped.
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub method: ProbeMethod,
    pub latency: Duration,
}

impl ProbeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A fetched still image.
#[derive(Debug, Clone)]
pub struct StillImage {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    pub latency: Duration,
}

/// An open clip download. Headers have been received and validated;
/// the body is pulled chunk by chunk.
#[derive(Debug)]
pub struct ClipDownload {
    url: Url,
    response: reqwest::Response,
    content_type: Option<String>,
    content_length: Option<u64>,
}

impl ClipDownload {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Body length announced by the backend, if any.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Next body chunk, `None` at end of body.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, Error> {
        self.response.chunk().await.map_err(Error::Transport)
    }
}

/// Async HTTP client for one recording backend.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct MediaClient {
    http: reqwest::Client,
    endpoints: Endpoints,
    credentials: Credentials,
}

impl MediaClient {
    /// Create a client from a `TransportConfig`.
    pub fn new(endpoints: Endpoints, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            endpoints,
            credentials: transport.credentials.clone(),
        })
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, endpoints: Endpoints, credentials: Credentials) -> Self {
        Self {
            http,
            endpoints,
            credentials,
        }
    }

    /// The backend URL layout.
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    // ── Probe ────────────────────────────────────────────────────────

    /// Cheap reachability check against one URL.
    ///
    /// Sends `HEAD`; if the backend answers 405 or 501, retries once with a
    /// one-byte ranged `GET` and drops the body as soon as headers arrive
    /// (MJPEG endpoints never end their body). Both attempts share `timeout`.
    pub async fn probe(&self, url: &Url, timeout: Duration) -> Result<ProbeResponse, Error> {
        let started = Instant::now();
        debug!(%url, "HEAD probe");

        let resp = self
            .send_within(self.request(Method::HEAD, url), timeout)
            .await?;

        if matches!(
            resp.status(),
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
        ) {
            let remaining = timeout.saturating_sub(started.elapsed());
            debug!(%url, status = resp.status().as_u16(), "HEAD refused, retrying with ranged GET");
            let resp = self
                .send_within(
                    self.request(Method::GET, url).header(RANGE, "bytes=0-0"),
                    remaining,
                )
                .await?;
            return Ok(probe_response(&resp, ProbeMethod::RangedGet, started.elapsed()));
        }

        Ok(probe_response(&resp, ProbeMethod::Head, started.elapsed()))
    }

    // ── Still image ──────────────────────────────────────────────────

    /// Fetch one still image, body included, within `timeout`.
    ///
    /// Rejects non-2xx statuses, non-image content types, and empty bodies.
    pub async fn fetch_image(&self, url: &Url, timeout: Duration) -> Result<StillImage, Error> {
        let started = Instant::now();
        debug!(%url, "GET still image");

        let fetch = async {
            let resp = self.request(Method::GET, url).timeout(timeout).send().await?;
            let resp = check_status(url, resp)?;
            let content_type = content_type(resp.headers());
            if let Some(ct) = content_type.as_deref() {
                if !ct.starts_with("image/") && ct != "application/octet-stream" {
                    return Err(Error::InvalidResponse {
                        url: url.to_string(),
                        message: format!("expected an image, got {ct}"),
                    });
                }
            }
            let bytes = resp.bytes().await?;
            Ok((bytes, content_type))
        };

        let (bytes, content_type) = match tokio::time::timeout(timeout, fetch).await {
            Ok(result) => result.map_err(|e| map_timeout(e, timeout))?,
            Err(_) => return Err(timeout_error(timeout)),
        };

        if bytes.is_empty() {
            return Err(Error::InvalidResponse {
                url: url.to_string(),
                message: "empty image body".into(),
            });
        }

        trace!(%url, size = bytes.len(), "still image received");
        Ok(StillImage {
            bytes,
            content_type,
            latency: started.elapsed(),
        })
    }

    // ── Clip download ────────────────────────────────────────────────

    /// Start a clip download, waiting at most `header_timeout` for headers.
    /// Body reads have no deadline here; callers guard stalls themselves.
    ///
    /// Backends answer missing clips with a 2xx JSON or HTML error page;
    /// those are rejected here before any byte hits the disk.
    pub async fn open_download(
        &self,
        url: &Url,
        header_timeout: Duration,
    ) -> Result<ClipDownload, Error> {
        debug!(%url, "GET clip");

        let resp = self
            .send_within(self.request(Method::GET, url), header_timeout)
            .await?;
        let resp = check_status(url, resp)?;

        let content_type = content_type(resp.headers());
        if let Some(ct) = content_type.as_deref() {
            if ct.starts_with("text/") || ct == "application/json" {
                return Err(Error::InvalidResponse {
                    url: url.to_string(),
                    message: format!("expected video, got {ct}"),
                });
            }
        }

        let content_length = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        Ok(ClipDownload {
            url: url.clone(),
            response: resp,
            content_type,
            content_length,
        })
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn request(&self, method: Method, url: &Url) -> reqwest::RequestBuilder {
        self.credentials
            .apply(self.http.request(method, url.clone()))
    }

    /// Send and wait for response headers, bounded by `timeout`.
    ///
    /// The body is not covered: a reqwest per-request timeout would also cap
    /// body reads, which cuts long clip downloads short.
    async fn send_within(
        &self,
        builder: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<reqwest::Response, Error> {
        match tokio::time::timeout(timeout, builder.send()).await {
            Ok(result) => result.map_err(|e| map_timeout(Error::Transport(e), timeout)),
            Err(_) => Err(timeout_error(timeout)),
        }
    }
}

// ── Response helpers ─────────────────────────────────────────────────

fn probe_response(resp: &reqwest::Response, method: ProbeMethod, latency: Duration) -> ProbeResponse {
    let content_length = resp
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    ProbeResponse {
        status: resp.status().as_u16(),
        content_type: content_type(resp.headers()),
        content_length,
        method,
        latency,
    }
}

/// Map 401/403 to `Authentication` and any other non-2xx to `Status`.
fn check_status(url: &Url, resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(Error::Authentication {
            message: format!("HTTP {} from {url}", status.as_u16()),
        });
    }
    if !status.is_success() {
        return Err(Error::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(resp)
}

/// Lowercased MIME essence of the `Content-Type` header.
fn content_type(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let essence = raw.split(';').next().unwrap_or_default().trim();
    (!essence.is_empty()).then(|| essence.to_ascii_lowercase())
}

fn timeout_error(timeout: Duration) -> Error {
    Error::Timeout {
        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

/// reqwest reports its own deadline as a transport error; normalize it.
fn map_timeout(err: Error, timeout: Duration) -> Error {
    match err {
        Error::Transport(ref e) if e.is_timeout() => timeout_error(timeout),
        other => other,
    }
}
