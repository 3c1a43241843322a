//! Stream delivery
//!
//! `DeliveryService::start` ties the pipeline together: admission first,
//! then format resolution and selection, then the upstream pipe. The pipe
//! runs in its own task which owns the admission permit, so the slot is
//! released on every exit path including client disconnect.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::config::ChannelProfile;
use crate::error::DeliveryError;
use crate::extract::FormatSelector;
use crate::formats::{FallbackLabel, FormatDescriptor, FormatKind};
use crate::limits::{AdmissionController, StreamPermit};
use crate::metrics::Metrics;
use crate::proxy::{client_channel, ContentClass, DeliveryBody, StreamProxy};
use crate::resolver::Resolver;
use crate::usage::UsageTracker;

/// Response header naming the audio track a video-only delivery belongs with
pub const COMPANION_AUDIO_HEADER: &str = "x-companion-audio-format";

fn height_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{3,4})p?$").unwrap())
}

/// Quality a client asks for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestedQuality {
    #[default]
    Best,
    Worst,
    Audio,
    /// Upper bound on the picture height
    Height(u32),
}

impl RequestedQuality {
    /// Parse `best`, `worst`, `audio`, `720` or `720p`
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        match value.as_str() {
            "" | "best" => Some(Self::Best),
            "worst" => Some(Self::Worst),
            "audio" | "bestaudio" => Some(Self::Audio),
            other => height_pattern()
                .captures(other)
                .and_then(|caps| caps[1].parse().ok())
                .map(Self::Height),
        }
    }

    fn selector(self) -> FormatSelector {
        match self {
            Self::Best => FormatSelector::Best,
            Self::Worst => FormatSelector::Worst,
            Self::Audio => FormatSelector::BestAudio,
            Self::Height(h) => FormatSelector::MaxHeight(h),
        }
    }

    fn label(self) -> String {
        match self {
            Self::Best => "best".to_string(),
            Self::Worst => "worst".to_string(),
            Self::Audio => "audio".to_string(),
            Self::Height(h) => format!("{h}p"),
        }
    }
}

/// One inbound delivery request
#[derive(Debug, Clone, Default)]
pub struct DeliveryRequest {
    pub video_id: String,
    pub quality: RequestedQuality,
    /// Exact format id; overrides `quality`
    pub format_hint: Option<String>,
    /// Audio format advertised alongside a video-only delivery
    pub companion_audio: Option<String>,
    /// Client `Range` header, forwarded upstream
    pub range: Option<HeaderValue>,
}

/// An admitted delivery, alive until its pipe finishes
#[derive(Debug, Clone, Serialize)]
pub struct StreamSession {
    pub id: Uuid,
    pub channel_id: String,
    pub video_id: String,
    pub quality: String,
    pub format_id: Option<String>,
    pub admitted_at: DateTime<Utc>,
}

/// Registry entry that holds the admission slot
struct ActiveSession {
    id: Uuid,
    sessions: Arc<DashMap<Uuid, StreamSession>>,
    _permit: StreamPermit,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
    }
}

/// A started delivery: status and headers are final, the body streams
pub struct Delivery {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: DeliveryBody,
}

impl IntoResponse for Delivery {
    fn into_response(self) -> Response {
        (self.status, self.headers, Body::from_stream(self.body)).into_response()
    }
}

/// Upstream resource chosen for a request
#[derive(Debug)]
struct Target {
    url: String,
    format_id: String,
    companion_audio: Option<String>,
}

/// Admission-controlled delivery front-end
pub struct DeliveryService {
    resolver: Arc<Resolver>,
    proxy: StreamProxy,
    admission: Arc<AdmissionController>,
    metrics: Arc<Metrics>,
    usage: Arc<UsageTracker>,
    sessions: Arc<DashMap<Uuid, StreamSession>>,
    buffer: usize,
}

impl DeliveryService {
    pub fn new(
        resolver: Arc<Resolver>,
        proxy: StreamProxy,
        admission: Arc<AdmissionController>,
        metrics: Arc<Metrics>,
        usage: Arc<UsageTracker>,
        buffer: usize,
    ) -> Self {
        Self {
            resolver,
            proxy,
            admission,
            metrics,
            usage,
            sessions: Arc::new(DashMap::new()),
            buffer,
        }
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Snapshot of in-flight sessions
    pub fn sessions(&self) -> Vec<StreamSession> {
        self.sessions.iter().map(|s| s.value().clone()).collect()
    }

    /// Start a media delivery.
    ///
    /// Admission is decided before the first suspension point; a rejected
    /// request never reaches resolution.
    pub async fn start(
        &self,
        channel: &ChannelProfile,
        request: DeliveryRequest,
    ) -> Result<Delivery, DeliveryError> {
        let Some(permit) = self.admission.try_acquire() else {
            let err = DeliveryError::AdmissionRejected {
                active: self.admission.active(),
                max: self.admission.max_concurrent(),
            };
            warn!("Rejecting delivery of {}: {}", request.video_id, err);
            self.metrics.record_error(err.kind());
            return Err(err);
        };

        let session = StreamSession {
            id: Uuid::new_v4(),
            channel_id: channel.id.clone(),
            video_id: request.video_id.clone(),
            quality: request.quality.label(),
            format_id: request.format_hint.clone(),
            admitted_at: Utc::now(),
        };
        let active = ActiveSession {
            id: session.id,
            sessions: Arc::clone(&self.sessions),
            _permit: permit,
        };
        self.sessions.insert(session.id, session.clone());
        self.metrics.record_delivery();
        self.sync_active();

        self.usage.record(
            &channel.id,
            "stream",
            json!({
                "video_id": request.video_id,
                "quality": session.quality,
                "format": request.format_hint,
            }),
        );

        let span = tracing::info_span!("delivery", session = %session.id);
        let started = async {
            let target = self.select(channel, &request).await?;
            let upstream = self.proxy.open(&target.url, request.range.as_ref()).await?;
            Ok::<_, DeliveryError>((target, upstream))
        }
        .instrument(span.clone())
        .await;

        let (target, upstream) = match started {
            Ok(started) => started,
            Err(e) => {
                warn!(parent: &span, "Delivery of {} failed: {}", request.video_id, e);
                self.metrics.record_error(e.kind());
                drop(active);
                self.sync_active();
                return Err(e);
            }
        };

        if let Some(mut entry) = self.sessions.get_mut(&session.id) {
            entry.format_id = Some(target.format_id.clone());
        }

        let status = upstream.status();
        let mut headers = upstream.response_headers(ContentClass::Media);
        if let Some(audio) = &target.companion_audio {
            if let Ok(value) = HeaderValue::from_str(audio) {
                headers.insert(HeaderName::from_static(COMPANION_AUDIO_HEADER), value);
            }
        }

        info!(
            parent: &span,
            "Streaming {} format {} ({})",
            session.video_id, target.format_id, status
        );

        let (sink, body) = client_channel(self.buffer);
        let proxy = self.proxy.clone();
        let metrics = Arc::clone(&self.metrics);
        let admission = Arc::clone(&self.admission);

        tokio::spawn(
            async move {
                let outcome = proxy.pipe(upstream, &sink).await;
                metrics.record_bytes(outcome.bytes);
                match &outcome.error {
                    None => info!("Delivery completed after {} bytes", outcome.bytes),
                    Some(e) => {
                        info!("Delivery ended {}: {}", outcome.state, e);
                        metrics.record_error(e.kind());
                    }
                }
                drop(active);
                metrics.set_active_streams(admission.active() as u64);
            }
            .instrument(span),
        );

        Ok(Delivery {
            status,
            headers,
            body,
        })
    }

    /// Proxy a video's thumbnail
    pub async fn thumbnail(
        &self,
        channel: &ChannelProfile,
        video_id: &str,
    ) -> Result<Delivery, DeliveryError> {
        let record = self.resolver.get_info(channel, video_id).await?;
        let url = record
            .thumbnail
            .ok_or_else(|| DeliveryError::FormatNotFound(format!("thumbnail of {video_id}")))?;
        self.asset(&url, ContentClass::Thumbnail).await
    }

    /// Proxy a subtitle track
    pub async fn subtitle(
        &self,
        channel: &ChannelProfile,
        video_id: &str,
        language: &str,
    ) -> Result<Delivery, DeliveryError> {
        let record = self.resolver.get_info(channel, video_id).await?;
        let track = record.subtitle_for(language).ok_or_else(|| {
            DeliveryError::FormatNotFound(format!("{language} subtitles of {video_id}"))
        })?;
        self.asset(&track.url, ContentClass::Subtitle).await
    }

    /// Small side resources skip admission
    async fn asset(&self, url: &str, class: ContentClass) -> Result<Delivery, DeliveryError> {
        let upstream = self.proxy.open(url, None).await.inspect_err(|e| {
            self.metrics.record_error(e.kind());
        })?;
        let status = upstream.status();
        let headers = upstream.response_headers(class);

        let (sink, body) = client_channel(self.buffer);
        let proxy = self.proxy.clone();
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            let outcome = proxy.pipe(upstream, &sink).await;
            metrics.record_bytes(outcome.bytes);
            if let Some(e) = outcome.error {
                metrics.record_error(e.kind());
            }
        });

        Ok(Delivery {
            status,
            headers,
            body,
        })
    }

    async fn select(
        &self,
        channel: &ChannelProfile,
        request: &DeliveryRequest,
    ) -> Result<Target, DeliveryError> {
        let list = self.resolver.get_formats(channel, &request.video_id).await;
        let formats = &list.formats;

        if let Some(hint) = &request.format_hint {
            let format = find(formats, hint)?;
            let companion = match &request.companion_audio {
                Some(audio) => Some(find(formats, audio)?.format_id.clone()),
                None => None,
            };
            return self.target_for(channel, &request.video_id, format, formats, companion).await;
        }

        match pick(formats, request.quality) {
            Some(format) => {
                self.target_for(channel, &request.video_id, format, formats, None)
                    .await
            }
            None => {
                self.resolve_selector(channel, &request.video_id, request.quality.selector())
                    .await
            }
        }
    }

    async fn target_for(
        &self,
        channel: &ChannelProfile,
        video_id: &str,
        format: &FormatDescriptor,
        formats: &[FormatDescriptor],
        companion_audio: Option<String>,
    ) -> Result<Target, DeliveryError> {
        if let FormatKind::FallbackProxy { label } = format.kind {
            let selector = match label {
                FallbackLabel::Best => FormatSelector::Best,
                FallbackLabel::Worst => FormatSelector::Worst,
            };
            return self.resolve_selector(channel, video_id, selector).await;
        }

        if let Some(url) = &format.upstream_url {
            return Ok(Target {
                url: url.clone(),
                format_id: format.format_id.clone(),
                companion_audio,
            });
        }

        // synthesized pair: deliver the video track, advertise the audio
        let pair = format
            .sources
            .as_ref()
            .ok_or_else(|| DeliveryError::FormatNotFound(format.format_id.clone()))?;
        let video = find(formats, &pair.video)?;
        let url = video
            .upstream_url
            .clone()
            .ok_or_else(|| DeliveryError::FormatNotFound(pair.video.clone()))?;

        Ok(Target {
            url,
            format_id: video.format_id.clone(),
            companion_audio: Some(pair.audio.clone()),
        })
    }

    async fn resolve_selector(
        &self,
        channel: &ChannelProfile,
        video_id: &str,
        selector: FormatSelector,
    ) -> Result<Target, DeliveryError> {
        let urls = self.resolver.resolve_url(channel, video_id, &selector).await?;
        let mut urls = urls.into_iter();
        let url = urls
            .next()
            .ok_or_else(|| DeliveryError::FormatNotFound(selector.to_string()))?;

        Ok(Target {
            url,
            format_id: selector.to_string(),
            companion_audio: None,
        })
    }

    fn sync_active(&self) {
        self.metrics.set_active_streams(self.admission.active() as u64);
    }
}

fn find<'a>(formats: &'a [FormatDescriptor], format_id: &str) -> Result<&'a FormatDescriptor, DeliveryError> {
    formats
        .iter()
        .find(|f| f.format_id == format_id)
        .ok_or_else(|| DeliveryError::FormatNotFound(format_id.to_string()))
}

/// Choose a format from a ranked list; `None` means ask the tool directly
fn pick(formats: &[FormatDescriptor], quality: RequestedQuality) -> Option<&FormatDescriptor> {
    let fallback = |wanted: FallbackLabel| {
        formats
            .iter()
            .find(|f| matches!(f.kind, FormatKind::FallbackProxy { label } if label == wanted))
    };

    match quality {
        RequestedQuality::Best => formats.first(),
        // synthesized pairs carry the best tracks, never the worst
        RequestedQuality::Worst => formats
            .iter()
            .rfind(|f| f.kind.is_combined() && f.sources.is_none())
            .or_else(|| {
                formats
                    .iter()
                    .rfind(|f| matches!(f.kind, FormatKind::VideoOnly { .. }))
            })
            .or_else(|| fallback(FallbackLabel::Worst)),
        RequestedQuality::Audio => formats
            .iter()
            .find(|f| matches!(f.kind, FormatKind::AudioOnly { .. })),
        RequestedQuality::Height(max) => formats
            .iter()
            .filter(|f| f.kind.is_combined() && f.upstream_url.is_some())
            .find(|f| f.kind.height() > 0 && f.kind.height() <= max),
    }
}
