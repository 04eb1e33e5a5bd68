//! HTTP probing and response classification.
//!
//! All probes share one pooled hyper client so repeated checks reuse
//! connections. Classification is a pure function of the status code and
//! the (capped) body, which keeps it trivially repeatable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::header::USER_AGENT;
use http::{Request, Uri};
use http_body_util::{BodyExt, Empty};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use vigil_core::{HealthStatus, truncate_chars};

use crate::error::ProbeError;
use crate::suggest::http_suggestion;

/// Bytes of response body read per probe; the rest is discarded.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Longest error message lifted out of a response body.
pub const MAX_MESSAGE_LEN: usize = 200;

/// Body keys searched for a human error message, in priority order.
const MESSAGE_KEYS: [&str; 5] = ["error", "message", "detail", "details", "error_description"];

/// A response reduced to what classification needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Shared HTTP client for every probe.
pub struct HttpProber {
    client: Client<HttpsConnector<HttpConnector>, Empty<Bytes>>,
    requests: AtomicU64,
}

impl HttpProber {
    /// Build the pooled client. `connect_timeout` bounds each TCP connect.
    pub fn new(connect_timeout: Duration) -> Result<Self, ProbeError> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(connect_timeout));
        http.set_nodelay(true);

        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())?
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .build(https);

        Ok(Self {
            client,
            requests: AtomicU64::new(0),
        })
    }

    /// Requests issued since construction.
    pub fn requests_sent(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Issue one GET, bounded by `timeout` and by `cancel`.
    pub async fn get(
        &self,
        url: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ProbeError> {
        let uri: Uri = url.parse().map_err(|e: http::uri::InvalidUri| ProbeError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        self.requests.fetch_add(1, Ordering::Relaxed);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProbeError::Cancelled),
            res = tokio::time::timeout(timeout, self.fetch(uri)) => match res {
                Ok(response) => response,
                Err(_) => {
                    debug!(%url, "http probe timed out");
                    Err(ProbeError::Timeout(timeout))
                }
            },
        }
    }

    async fn fetch(&self, uri: Uri) -> Result<HttpResponse, ProbeError> {
        let req = Request::get(uri.clone())
            .header(USER_AGENT, concat!("vigil-health/", env!("CARGO_PKG_VERSION")))
            .body(Empty::<Bytes>::new())
            .map_err(|e| ProbeError::InvalidUrl {
                url: uri.to_string(),
                reason: e.to_string(),
            })?;

        let resp = self.client.request(req).await?;
        let status = resp.status().as_u16();

        let mut body = resp.into_body();
        let mut buf = Vec::new();
        while buf.len() < MAX_BODY_BYTES {
            match body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        let take = data.len().min(MAX_BODY_BYTES - buf.len());
                        buf.extend_from_slice(&data[..take]);
                    }
                }
                Some(Err(e)) => {
                    // The status line already arrived; keep whatever body we have.
                    debug!(%uri, error = %e, "http probe body read failed");
                    break;
                }
                None => break,
            }
        }

        debug!(%uri, status, bytes = buf.len(), "http probe answered");
        Ok(HttpResponse {
            status,
            body: Bytes::from(buf),
        })
    }
}

/// Outcome of classifying one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: HealthStatus,
    /// Advice for error statuses (>= 400).
    pub suggestion: Option<&'static str>,
    /// Error message found in the body of an error response.
    pub message: Option<String>,
    /// `status` field reported by the body, when it overrode the code.
    pub reported: Option<String>,
}

/// Classify a status code and body.
///
/// 2xx/3xx are healthy, 5xx unhealthy, anything else degraded. A JSON body
/// with a recognized `status` field overrides the code-derived status.
pub fn classify(code: u16, body: &[u8]) -> Classification {
    let mut status = match code {
        200..=399 => HealthStatus::Healthy,
        500..=u16::MAX => HealthStatus::Unhealthy,
        _ => HealthStatus::Degraded,
    };

    let json: Option<serde_json::Value> = serde_json::from_slice(body).ok();

    let reported = json
        .as_ref()
        .and_then(|v| v.get("status"))
        .and_then(|s| s.as_str())
        .and_then(|s| HealthStatus::from_reported(s).map(|parsed| (s.to_string(), parsed)));
    if let Some((_, parsed)) = &reported {
        status = *parsed;
    }

    let (suggestion, message) = if code >= 400 {
        (Some(http_suggestion(code)), extract_error_message(json.as_ref(), body))
    } else {
        (None, None)
    };

    Classification {
        status,
        suggestion,
        message,
        reported: reported.map(|(raw, _)| raw),
    }
}

/// Pull a human error message out of a response body.
///
/// Looks at `error`, `message`, `detail`, `details`, `error_description` in
/// that order; otherwise falls back to the raw body, truncated.
fn extract_error_message(json: Option<&serde_json::Value>, body: &[u8]) -> Option<String> {
    if let Some(obj) = json.and_then(|v| v.as_object()) {
        for key in MESSAGE_KEYS {
            match obj.get(key) {
                Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
                    return Some(bounded(s.trim()));
                }
                Some(serde_json::Value::Null) | None => {}
                Some(serde_json::Value::String(_)) => {}
                Some(other) => return Some(bounded(&other.to_string())),
            }
        }
    }

    let raw = String::from_utf8_lossy(body);
    let raw = raw.trim();
    if raw.is_empty() {
        None
    } else {
        Some(bounded(raw))
    }
}

fn bounded(s: &str) -> String {
    truncate_chars(s, MAX_MESSAGE_LEN).unwrap_or_else(|| s.to_string())
}
