//! Axum router configuration

use axum::{
    http::{header, HeaderName, Method},
    middleware,
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::delivery::COMPANION_AUDIO_HEADER;
use crate::state::AppState;

use super::handlers::{
    channel_listing, combine, health_check, metrics, search, status, stream, subtitles, thumbnail,
    version_check, video_formats, video_info,
};
use super::middleware::request_logger;

/// Create the Axum router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let router = Router::new()
        // Health and version endpoints
        .route("/health", get(health_check))
        .route("/version", get(version_check))
        // Diagnostics
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        // Resolution
        .route("/channels/{channel}/search", get(search))
        .route("/channels/{channel}/listing", get(channel_listing))
        .route("/channels/{channel}/videos/{id}", get(video_info))
        .route("/channels/{channel}/videos/{id}/formats", get(video_formats))
        // Delivery
        .route("/channels/{channel}/videos/{id}/stream", get(stream))
        .route("/channels/{channel}/videos/{id}/combine", get(combine))
        .route("/channels/{channel}/videos/{id}/thumbnail", get(thumbnail))
        .route(
            "/channels/{channel}/videos/{id}/subtitles/{lang}",
            get(subtitles),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            request_logger,
        ))
        .layer(TraceLayer::new_for_http());

    let router = if state.config.cors_enabled {
        // Players issue range requests and read the size/range headers
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
            .allow_headers([header::ACCEPT, header::RANGE, header::ORIGIN])
            .expose_headers([
                header::CONTENT_LENGTH,
                header::CONTENT_RANGE,
                header::ACCEPT_RANGES,
                HeaderName::from_static(COMPANION_AUDIO_HEADER),
            ])
            .max_age(Duration::from_secs(3600));
        router.layer(cors)
    } else {
        router
    };

    router.with_state(state)
}
