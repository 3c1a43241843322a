//! Local stand-in for an upstream media host
//!
//! Serves fixture media, thumbnails and subtitles on an ephemeral port.
//! `/endless/...` paths stream forever and raise a flag once the server
//! drops the response body, which happens when the reader disconnects.
//! `/stall/...` paths send one chunk and then stop without closing.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Observations made by the fake host
#[derive(Default)]
pub struct UpstreamProbe {
    /// Requests received for endless bodies
    pub endless_requests: AtomicUsize,
    /// Set when an endless body was dropped
    pub endless_dropped: AtomicBool,
}

/// Sets the probe flag when the body owning it goes away
struct DropFlag(Arc<UpstreamProbe>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.endless_dropped.store(true, Ordering::SeqCst);
    }
}

pub struct FakeUpstream {
    pub addr: SocketAddr,
    pub probe: Arc<UpstreamProbe>,
}

impl FakeUpstream {
    /// Bind on 127.0.0.1 and serve in the background
    pub async fn start() -> Self {
        let probe = Arc::new(UpstreamProbe::default());
        let router = Router::new()
            .route("/media/{file}", get(media))
            .route("/thumb/{file}", get(thumb))
            .route("/subs/{file}", get(subs))
            .route("/endless/media/{file}", get(endless))
            .route("/stall/media/{file}", get(stall))
            .with_state(Arc::clone(&probe));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { addr, probe }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Base URL whose media paths never finish
    pub fn endless_base_url(&self) -> String {
        format!("http://{}/endless", self.addr)
    }

    /// Base URL whose media paths send one chunk and then go quiet
    pub fn stall_base_url(&self) -> String {
        format!("http://{}/stall", self.addr)
    }
}

/// Body `media:<file>`, honoring a `bytes=start-end` range
async fn media(Path(file): Path<String>, headers: HeaderMap) -> Response {
    let body = format!("media:{file}").into_bytes();
    let total = body.len();

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.split_once('-'))
        .and_then(|(start, end)| Some((start.parse::<usize>().ok()?, end.parse::<usize>().ok()?)));

    match range {
        Some((start, end)) if start <= end && end < total => (
            StatusCode::PARTIAL_CONTENT,
            [
                (header::CONTENT_TYPE, "video/mp4".to_string()),
                (header::CONTENT_RANGE, format!("bytes {start}-{end}/{total}")),
            ],
            body[start..=end].to_vec(),
        )
            .into_response(),
        _ => ([(header::CONTENT_TYPE, "video/mp4")], body).into_response(),
    }
}

async fn thumb(Path(_file): Path<String>) -> Response {
    ([(header::CONTENT_TYPE, "image/webp")], vec![0u8; 64]).into_response()
}

async fn subs(Path(_file): Path<String>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/vtt")],
        "WEBVTT\n\n00:00.000 --> 00:01.000\nhello\n",
    )
        .into_response()
}

async fn endless(State(probe): State<Arc<UpstreamProbe>>) -> Response {
    probe.endless_requests.fetch_add(1, Ordering::SeqCst);
    let flag = DropFlag(Arc::clone(&probe));
    let chunks = futures_util::stream::unfold(flag, |flag| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Some((Ok::<_, std::io::Error>(Bytes::from(vec![b'x'; 4096])), flag))
    });
    ([(header::CONTENT_TYPE, "video/mp4")], Body::from_stream(chunks)).into_response()
}

async fn stall() -> Response {
    let chunks = futures_util::stream::unfold(false, |sent| async move {
        if sent {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Some((Ok::<_, std::io::Error>(Bytes::from_static(b"head")), true))
    });
    ([(header::CONTENT_TYPE, "video/mp4")], Body::from_stream(chunks)).into_response()
}
