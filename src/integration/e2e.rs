//! End-to-end scenarios through the HTTP router

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures_util::StreamExt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

use crate::config::ServerConfig;
use crate::delivery::COMPANION_AUDIO_HEADER;
use crate::http::create_router;
use crate::state::AppState;

use super::fixtures::{search_output, split_track_dump, video_dump, ScriptedExtractor};
use super::upstream::FakeUpstream;

fn setup(extractor: Arc<ScriptedExtractor>, max_concurrent: usize) -> (Arc<AppState>, Router) {
    setup_with_timeout(extractor, max_concurrent, 5)
}

fn setup_with_timeout(
    extractor: Arc<ScriptedExtractor>,
    max_concurrent: usize,
    timeout_secs: u64,
) -> (Arc<AppState>, Router) {
    let mut config = ServerConfig::default();
    config.stream.max_concurrent = max_concurrent;
    config.stream.timeout_secs = timeout_secs;
    let state = Arc::new(AppState::new(config, extractor));
    let router = create_router(Arc::clone(&state));
    (state, router)
}

async fn get(router: &Router, uri: &str) -> axum::response::Response {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    router.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn repeated_search_invokes_tool_once() {
    let extractor = Arc::new(ScriptedExtractor::ok(search_output(8)));
    let (_, router) = setup(extractor.clone(), 10);

    let first = get(&router, "/channels/youtube/search?q=a").await;
    assert_eq!(first.status(), StatusCode::OK);
    let second = get(&router, "/channels/youtube/search?q=a").await;
    assert_eq!(second.status(), StatusCode::OK);

    assert_eq!(extractor.calls(), 1);
}

#[tokio::test]
async fn deep_pages_are_rejected_before_the_tool_runs() {
    let extractor = Arc::new(ScriptedExtractor::ok(search_output(8)));
    let (_, router) = setup(extractor.clone(), 10);

    let response = get(&router, "/channels/youtube/search?q=a&skip=18446744073709551615").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = get(&router, "/channels/youtube/search?q=a&skip=1000000000000").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["error"], "bad_request");

    let response = get(
        &router,
        "/channels/youtube/listing?url=https://example.com/c&skip=490&limit=20",
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(extractor.calls(), 0);

    let response = get(&router, "/channels/youtube/search?q=a&skip=480&limit=20").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(extractor.calls(), 1);
}

#[tokio::test]
async fn stream_delivers_best_combined_format() {
    let upstream = FakeUpstream::start().await;
    let extractor = Arc::new(ScriptedExtractor::ok(video_dump("abc", &upstream.base_url())));
    let (state, router) = setup(extractor, 10);

    let response = get(&router, "/channels/youtube/videos/abc/stream").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
    assert_eq!(body_bytes(response).await, b"media:22.mp4");

    assert!(wait_for(|| state.admission.active() == 0).await);
    assert!(state.metrics.bytes_served() >= 12);
}

#[tokio::test]
async fn range_requests_are_forwarded() {
    let upstream = FakeUpstream::start().await;
    let extractor = Arc::new(ScriptedExtractor::ok(video_dump("abc", &upstream.base_url())));
    let (_, router) = setup(extractor, 10);

    let request = Request::builder()
        .uri("/channels/youtube/videos/abc/stream?format=18")
        .header(header::RANGE, "bytes=0-4")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 0-4/12");
    assert_eq!(body_bytes(response).await, b"media");
}

#[tokio::test]
async fn unknown_format_is_not_found() {
    let upstream = FakeUpstream::start().await;
    let extractor = Arc::new(ScriptedExtractor::ok(video_dump("abc", &upstream.base_url())));
    let (state, router) = setup(extractor, 10);

    let response = get(&router, "/channels/youtube/videos/abc/stream?format=999").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["error"], "format_not_found");
    assert_eq!(state.admission.active(), 0);
}

#[tokio::test]
async fn combined_endpoint_advertises_audio() {
    let upstream = FakeUpstream::start().await;
    let extractor = Arc::new(ScriptedExtractor::ok(split_track_dump("abc", &upstream.base_url())));
    let (_, router) = setup(extractor, 10);

    let response = get(&router, "/channels/youtube/videos/abc/formats").await;
    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    let first = &json["formats"][0];
    assert_eq!(first["kind"], "combined");
    let delivery_url = first["delivery_url"].as_str().unwrap();
    assert!(delivery_url.ends_with("/channels/youtube/videos/abc/combine?video=137&audio=140"));

    let response = get(&router, "/channels/youtube/videos/abc/combine?video=137&audio=140").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[COMPANION_AUDIO_HEADER], "140");
    assert_eq!(body_bytes(response).await, b"media:137.mp4");
}

#[tokio::test]
async fn thumbnail_and_subtitles_are_proxied() {
    let upstream = FakeUpstream::start().await;
    let extractor = Arc::new(ScriptedExtractor::ok(video_dump("abc", &upstream.base_url())));
    let (state, router) = setup(extractor.clone(), 10);

    let response = get(&router, "/channels/youtube/videos/abc/thumbnail").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/webp");
    assert_eq!(response.headers()[header::CACHE_CONTROL], "public, max-age=86400");
    assert_eq!(body_bytes(response).await.len(), 64);

    let response = get(&router, "/channels/youtube/videos/abc/subtitles/en").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain; charset=utf-8");
    assert!(body_bytes(response).await.starts_with(b"WEBVTT"));

    let response = get(&router, "/channels/youtube/videos/abc/subtitles/de").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // one metadata dump served all three lookups
    assert_eq!(extractor.calls(), 1);
    assert_eq!(state.admission.active(), 0);
}

#[tokio::test]
async fn admission_rejects_without_resolving() {
    let upstream = FakeUpstream::start().await;
    let extractor = Arc::new(ScriptedExtractor::ok(video_dump("abc", &upstream.endless_base_url())));
    let (state, router) = setup(extractor.clone(), 1);

    let held = get(&router, "/channels/youtube/videos/abc/stream").await;
    assert_eq!(held.status(), StatusCode::OK);
    assert_eq!(state.admission.active(), 1);
    let calls = extractor.calls();

    let rejected = get(&router, "/channels/youtube/videos/other/stream").await;
    assert_eq!(rejected.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json: serde_json::Value = serde_json::from_slice(&body_bytes(rejected).await).unwrap();
    assert_eq!(json["error"], "admission_rejected");
    assert_eq!(extractor.calls(), calls);
    assert_eq!(state.admission.active(), 1);

    drop(held);
    assert!(wait_for(|| state.admission.active() == 0).await);
}

#[tokio::test]
async fn client_disconnect_aborts_upstream() {
    let upstream = FakeUpstream::start().await;
    let extractor = Arc::new(ScriptedExtractor::ok(video_dump("abc", &upstream.endless_base_url())));
    let (state, router) = setup(extractor, 4);
    let before = state.admission.active();

    let response = get(&router, "/channels/youtube/videos/abc/stream").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.admission.active(), before + 1);

    let mut body = response.into_body().into_data_stream();
    let chunk = body.next().await.unwrap().unwrap();
    assert!(!chunk.is_empty());
    drop(body);

    assert!(wait_for(|| state.admission.active() == before).await);
    assert!(wait_for(|| upstream.probe.endless_dropped.load(Ordering::SeqCst)).await);
    assert_eq!(upstream.probe.endless_requests.load(Ordering::SeqCst), 1);
    assert!(wait_for(|| state.metrics.error_count("client_aborted") == 1).await);
    assert_eq!(state.metrics.error_count("stream_timeout"), 0);
    assert!(state.delivery.sessions().is_empty());
}

#[tokio::test]
async fn stalled_upstream_times_out_and_frees_slot() {
    let upstream = FakeUpstream::start().await;
    let extractor = Arc::new(ScriptedExtractor::ok(video_dump("abc", &upstream.stall_base_url())));
    let (state, router) = setup_with_timeout(extractor, 2, 1);

    let response = get(&router, "/channels/youtube/videos/abc/stream").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.admission.active(), 1);

    let mut body = response.into_body().into_data_stream();
    let mut received = Vec::new();
    let mut failed = false;
    while let Some(item) = body.next().await {
        match item {
            Ok(chunk) => received.extend_from_slice(&chunk),
            Err(_) => failed = true,
        }
    }

    assert_eq!(received, b"head");
    assert!(failed);
    assert!(wait_for(|| state.admission.active() == 0).await);
    assert!(wait_for(|| state.metrics.error_count("stream_timeout") == 1).await);
    assert_eq!(state.metrics.error_count("client_aborted"), 0);
}
