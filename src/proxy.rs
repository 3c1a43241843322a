//! Upstream byte pipe
//!
//! Opens an HTTP GET against a resolved media URL and copies the body to
//! the client one chunk at a time. The copy loop watches a cancellation
//! token that fires when the client body is dropped; on cancellation the
//! upstream response is dropped, which closes the connection.
//!
//! States: CONNECTING -> HEADERS_RECEIVED -> STREAMING -> COMPLETED | FAILED | ABORTED

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::error::DeliveryError;

/// Upstream headers copied to the client as-is
const FORWARDED_HEADERS: &[HeaderName] = &[header::CONTENT_LENGTH, header::CONTENT_RANGE];

/// What kind of resource is piped; decides the fixed response headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    Media,
    Thumbnail,
    Subtitle,
}

impl ContentClass {
    fn default_content_type(self) -> &'static str {
        match self {
            ContentClass::Media => "video/mp4",
            ContentClass::Thumbnail => "image/jpeg",
            ContentClass::Subtitle => "text/plain; charset=utf-8",
        }
    }

    fn cache_control(self) -> &'static str {
        match self {
            ContentClass::Media => "no-cache",
            ContentClass::Thumbnail => "public, max-age=86400",
            ContentClass::Subtitle => "public, max-age=3600",
        }
    }

    /// Subtitle tracks come back as assorted text types; always label them plain text
    fn trusts_upstream_type(self) -> bool {
        !matches!(self, ContentClass::Subtitle)
    }
}

/// Proxy lifecycle, reported in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Connecting,
    HeadersReceived,
    Streaming,
    Completed,
    Failed,
    Aborted,
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProxyState::Connecting => "CONNECTING",
            ProxyState::HeadersReceived => "HEADERS_RECEIVED",
            ProxyState::Streaming => "STREAMING",
            ProxyState::Completed => "COMPLETED",
            ProxyState::Failed => "FAILED",
            ProxyState::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// An upstream response whose headers have arrived
pub struct Upstream {
    response: reqwest::Response,
}

impl Upstream {
    /// Status passed on to the client (200 or 206)
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// Client response headers for a content class
    pub fn response_headers(&self, class: ContentClass) -> HeaderMap {
        build_headers(class, self.response.headers())
    }
}

/// Result of one copy loop
#[derive(Debug)]
pub struct PipeOutcome {
    /// Bytes handed to the client
    pub bytes: u64,
    /// Terminal state
    pub state: ProxyState,
    pub error: Option<DeliveryError>,
}

/// Producer half of a client body
pub struct ClientSink {
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
    cancel: CancellationToken,
}

impl ClientSink {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    async fn send(&self, chunk: Bytes) -> Result<(), DeliveryError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DeliveryError::ClientAborted),
            sent = self.tx.send(Ok(chunk)) => sent.map_err(|_| DeliveryError::ClientAborted),
        }
    }

    /// Terminate the client body with an error instead of a clean end
    async fn fail(&self, err: &DeliveryError) {
        let _ = self.tx.send(Err(io::Error::other(err.to_string()))).await;
    }
}

/// Consumer half of a client body; dropping it cancels the copy loop
pub struct DeliveryBody {
    rx: mpsc::Receiver<Result<Bytes, io::Error>>,
    _guard: DropGuard,
}

impl Stream for DeliveryBody {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Create a connected sink/body pair with `buffer` chunks of slack
pub fn client_channel(buffer: usize) -> (ClientSink, DeliveryBody) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let cancel = CancellationToken::new();
    let body = DeliveryBody {
        rx,
        _guard: cancel.clone().drop_guard(),
    };
    (ClientSink { tx, cancel }, body)
}

/// HTTP byte pipe to upstream media hosts
#[derive(Clone)]
pub struct StreamProxy {
    client: reqwest::Client,
    timeout: Duration,
}

impl StreamProxy {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self { client, timeout }
    }

    /// Open `url`, waiting at most the safety timeout for response headers.
    ///
    /// Non-2xx statuses fail before anything reaches the client.
    pub async fn open(&self, url: &str, range: Option<&HeaderValue>) -> Result<Upstream, DeliveryError> {
        debug!("Proxy {} {}", ProxyState::Connecting, redact(url));

        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(header::RANGE, range.clone());
        }

        let response = match tokio::time::timeout(self.timeout, request.send()).await {
            Err(_) => return Err(DeliveryError::StreamTimeout(self.timeout.as_secs())),
            Ok(Err(e)) if e.is_timeout() => {
                return Err(DeliveryError::StreamTimeout(self.timeout.as_secs()))
            }
            Ok(Err(e)) => {
                return Err(DeliveryError::UpstreamHttp {
                    status: StatusCode::BAD_GATEWAY.as_u16(),
                    message: e.to_string(),
                })
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::UpstreamHttp {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("upstream error").to_string(),
            });
        }

        debug!("Proxy {} status {}", ProxyState::HeadersReceived, status);
        Ok(Upstream { response })
    }

    /// Copy the upstream body into `sink` until it ends, stalls longer than
    /// the safety timeout, or the client disconnects.
    pub async fn pipe(&self, upstream: Upstream, sink: &ClientSink) -> PipeOutcome {
        let mut stream = upstream.response.bytes_stream();
        let mut bytes = 0u64;
        debug!("Proxy {}", ProxyState::Streaming);

        let result = loop {
            if sink.is_cancelled() {
                break Err(DeliveryError::ClientAborted);
            }

            let next = tokio::select! {
                biased;
                _ = sink.cancel.cancelled() => break Err(DeliveryError::ClientAborted),
                next = tokio::time::timeout(self.timeout, stream.next()) => next,
            };

            let chunk = match next {
                Err(_) => break Err(DeliveryError::StreamTimeout(self.timeout.as_secs())),
                Ok(None) => break Ok(()),
                Ok(Some(Err(e))) if e.is_timeout() => {
                    break Err(DeliveryError::StreamTimeout(self.timeout.as_secs()))
                }
                Ok(Some(Err(e))) => {
                    break Err(DeliveryError::UpstreamHttp {
                        status: StatusCode::BAD_GATEWAY.as_u16(),
                        message: e.to_string(),
                    })
                }
                Ok(Some(Ok(chunk))) => chunk,
            };

            let len = chunk.len() as u64;
            if let Err(e) = sink.send(chunk).await {
                break Err(e);
            }
            bytes += len;
        };

        // no more reads; closes the upstream connection
        drop(stream);

        let (state, error) = match result {
            Ok(()) => (ProxyState::Completed, None),
            Err(DeliveryError::ClientAborted) => (ProxyState::Aborted, Some(DeliveryError::ClientAborted)),
            Err(e) => {
                sink.fail(&e).await;
                (ProxyState::Failed, Some(e))
            }
        };

        debug!("Proxy {} after {} bytes", state, bytes);
        PipeOutcome { bytes, state, error }
    }
}

fn build_headers(class: ContentClass, upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for name in FORWARDED_HEADERS {
        if let Some(value) = upstream.get(name) {
            headers.insert(name.clone(), value.clone());
        }
    }

    let content_type = upstream
        .get(header::CONTENT_TYPE)
        .filter(|_| class.trusts_upstream_type())
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(class.default_content_type()));
    headers.insert(header::CONTENT_TYPE, content_type);

    if class == ContentClass::Media {
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(class.cache_control()));
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));

    headers
}

/// Upstream URLs carry signatures in the query; keep them out of logs
fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
