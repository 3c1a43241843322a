//! HTTP request handlers
//!
//! Implements handlers for resolution, delivery and diagnostics endpoints.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::config::ChannelProfile;
use crate::delivery::{Delivery, DeliveryRequest, RequestedQuality};
use crate::error::{DeliveryError, ExtractError};
use crate::extract::{DateFilter, DurationFilter, SearchFilters, SearchType, VideoRecord};
use crate::resolver::{FormatList, VideoPage, DEFAULT_LIMIT, MAX_LIMIT};
use crate::state::{AppState, StatusReport};

/// HTTP error type
#[derive(Debug)]
pub enum HttpError {
    ChannelNotFound(String),
    BadRequest(String),
    Extraction(ExtractError),
    Delivery(DeliveryError),
}

impl HttpError {
    fn status(&self) -> StatusCode {
        match self {
            HttpError::ChannelNotFound(_) => StatusCode::NOT_FOUND,
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::Extraction(e) => extraction_status(e),
            HttpError::Delivery(e) => match e {
                DeliveryError::AdmissionRejected { .. } => StatusCode::SERVICE_UNAVAILABLE,
                DeliveryError::FormatNotFound(_) => StatusCode::NOT_FOUND,
                DeliveryError::UpstreamHttp { .. } => StatusCode::BAD_GATEWAY,
                DeliveryError::StreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                DeliveryError::ClientAborted => StatusCode::BAD_GATEWAY,
                DeliveryError::Extraction(e) => extraction_status(e),
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            HttpError::ChannelNotFound(_) => "channel_not_found",
            HttpError::BadRequest(_) => "bad_request",
            HttpError::Extraction(e) => e.kind(),
            HttpError::Delivery(e) => e.kind(),
        }
    }

    fn details(&self) -> String {
        match self {
            HttpError::ChannelNotFound(id) => format!("Unknown channel: {}", id),
            HttpError::BadRequest(msg) => msg.clone(),
            HttpError::Extraction(e) => e.to_string(),
            HttpError::Delivery(e) => e.to_string(),
        }
    }
}

fn extraction_status(err: &ExtractError) -> StatusCode {
    match err {
        ExtractError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.kind(),
            "details": self.details(),
        });
        (self.status(), Json(body)).into_response()
    }
}

impl From<DeliveryError> for HttpError {
    fn from(err: DeliveryError) -> Self {
        HttpError::Delivery(err)
    }
}

impl From<ExtractError> for HttpError {
    fn from(err: ExtractError) -> Self {
        HttpError::Extraction(err)
    }
}

/// Extension trait for AppState
pub trait AppStateExt {
    fn channel_or_error(&self, id: &str) -> Result<&ChannelProfile, HttpError>;
}

impl AppStateExt for AppState {
    fn channel_or_error(&self, id: &str) -> Result<&ChannelProfile, HttpError> {
        self.channel(id)
            .ok_or_else(|| HttpError::ChannelNotFound(id.to_string()))
    }
}

/// Clamp `limit` and reject pages reaching past `max_results`
fn page_bounds(
    skip: Option<usize>,
    limit: Option<usize>,
    max_results: usize,
) -> Result<(usize, usize), HttpError> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let skip = skip.unwrap_or(0);
    match skip.checked_add(limit) {
        Some(end) if end <= max_results => Ok((skip, limit)),
        _ => Err(HttpError::BadRequest(format!(
            "skip + limit must not exceed {}",
            max_results
        ))),
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// Version endpoint
pub async fn version_check() -> &'static str {
    concat!("media-relay v", env!("CARGO_PKG_VERSION"))
}

/// Diagnostics endpoint
/// GET /status
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusReport> {
    Json(state.status())
}

/// Metrics endpoint
/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let output = state
        .metrics
        .export_prometheus(&state.resolver.cache_stats());

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        output,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
    #[serde(rename = "type")]
    pub search_type: Option<SearchType>,
    pub date: Option<DateFilter>,
    pub duration: Option<DurationFilter>,
}

/// Search endpoint
/// GET /channels/{channel}/search?q=
pub async fn search(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<VideoPage>, HttpError> {
    let channel = state.channel_or_error(&channel_id)?;
    let q = query
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| HttpError::BadRequest("Missing search query `q`".to_string()))?;

    let filters = SearchFilters {
        search_type: query.search_type.unwrap_or_default(),
        date: query.date,
        duration: query.duration,
    };
    let (skip, limit) = page_bounds(
        query.skip,
        query.limit,
        state.config.extractor.max_results,
    )?;

    Ok(Json(
        state.resolver.search(channel, q, &filters, skip, limit).await,
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListingQuery {
    pub url: String,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

/// Channel listing endpoint
/// GET /channels/{channel}/listing?url=
pub async fn channel_listing(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
    Query(query): Query<ListingQuery>,
) -> Result<Json<VideoPage>, HttpError> {
    let channel = state.channel_or_error(&channel_id)?;
    if !query.url.starts_with("http://") && !query.url.starts_with("https://") {
        return Err(HttpError::BadRequest(format!(
            "Listing URL must be http(s): {}",
            query.url
        )));
    }
    let (skip, limit) = page_bounds(
        query.skip,
        query.limit,
        state.config.extractor.max_results,
    )?;

    Ok(Json(
        state
            .resolver
            .get_channel_videos(channel, &query.url, skip, limit)
            .await,
    ))
}

/// Video metadata endpoint
/// GET /channels/{channel}/videos/{id}
pub async fn video_info(
    State(state): State<Arc<AppState>>,
    Path((channel_id, video_id)): Path<(String, String)>,
) -> Result<Json<VideoRecord>, HttpError> {
    let channel = state.channel_or_error(&channel_id)?;
    Ok(Json(state.resolver.get_info(channel, &video_id).await?))
}

/// Format list endpoint
/// GET /channels/{channel}/videos/{id}/formats
pub async fn video_formats(
    State(state): State<Arc<AppState>>,
    Path((channel_id, video_id)): Path<(String, String)>,
) -> Result<Json<FormatList>, HttpError> {
    let channel = state.channel_or_error(&channel_id)?;
    Ok(Json(state.resolver.get_formats(channel, &video_id).await))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub quality: Option<String>,
    pub format: Option<String>,
}

/// Stream delivery endpoint
/// GET /channels/{channel}/videos/{id}/stream?quality=&format=
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Path((channel_id, video_id)): Path<(String, String)>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Delivery, HttpError> {
    let channel = state.channel_or_error(&channel_id)?;
    let quality = match query.quality.as_deref() {
        None => RequestedQuality::Best,
        Some(q) => RequestedQuality::parse(q)
            .ok_or_else(|| HttpError::BadRequest(format!("Unknown quality: {}", q)))?,
    };

    let request = DeliveryRequest {
        video_id,
        quality,
        format_hint: query.format,
        companion_audio: None,
        range: headers.get(header::RANGE).cloned(),
    };
    Ok(state.delivery.start(channel, request).await?)
}

#[derive(Debug, Deserialize)]
pub struct CombineQuery {
    pub video: String,
    pub audio: String,
}

/// Combined-format endpoint: delivers the video track and advertises the
/// audio track in a response header
/// GET /channels/{channel}/videos/{id}/combine?video=&audio=
pub async fn combine(
    State(state): State<Arc<AppState>>,
    Path((channel_id, video_id)): Path<(String, String)>,
    Query(query): Query<CombineQuery>,
    headers: HeaderMap,
) -> Result<Delivery, HttpError> {
    let channel = state.channel_or_error(&channel_id)?;
    let request = DeliveryRequest {
        video_id,
        quality: RequestedQuality::Best,
        format_hint: Some(query.video),
        companion_audio: Some(query.audio),
        range: headers.get(header::RANGE).cloned(),
    };
    Ok(state.delivery.start(channel, request).await?)
}

/// Thumbnail endpoint
/// GET /channels/{channel}/videos/{id}/thumbnail
pub async fn thumbnail(
    State(state): State<Arc<AppState>>,
    Path((channel_id, video_id)): Path<(String, String)>,
) -> Result<Delivery, HttpError> {
    let channel = state.channel_or_error(&channel_id)?;
    Ok(state.delivery.thumbnail(channel, &video_id).await?)
}

/// Subtitle endpoint
/// GET /channels/{channel}/videos/{id}/subtitles/{lang}
pub async fn subtitles(
    State(state): State<Arc<AppState>>,
    Path((channel_id, video_id, language)): Path<(String, String, String)>,
) -> Result<Delivery, HttpError> {
    let channel = state.channel_or_error(&channel_id)?;
    Ok(state.delivery.subtitle(channel, &video_id, &language).await?)
}
