//! Format normalizer
//!
//! Turns the tool's loose format entries into a ranked, deduplicated list
//! of deliverable variants. Classification happens once, here: every
//! descriptor carries a `FormatKind` with the fields that kind requires.

use serde::Serialize;
use std::collections::HashSet;

use crate::extract::RawFormat;

/// Video codecs that earn a bonus
const MODERN_VIDEO_CODECS: &[&str] = &["av01", "vp09", "vp9", "hev1", "hvc1", "hevc"];

/// Audio codecs that earn a bonus
const MODERN_AUDIO_CODECS: &[&str] = &["opus", "flac", "ec-3"];

/// Transfer protocols that can be piped as a single byte stream
const PIPEABLE_PROTOCOLS: &[&str] = &["http", "https"];

/// Label of a generic fallback variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackLabel {
    Best,
    Worst,
}

impl FallbackLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            FallbackLabel::Best => "best",
            FallbackLabel::Worst => "worst",
        }
    }
}

/// What a variant carries
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FormatKind {
    Combined {
        height: u32,
        fps: Option<f64>,
        vcodec: String,
        acodec: String,
    },
    VideoOnly {
        height: u32,
        fps: Option<f64>,
        vcodec: String,
    },
    AudioOnly {
        acodec: String,
        bitrate: Option<f64>,
    },
    FallbackProxy {
        label: FallbackLabel,
    },
}

impl FormatKind {
    /// Sort priority, lower first
    pub fn priority(&self) -> u8 {
        match self {
            FormatKind::Combined { .. } => 0,
            FormatKind::VideoOnly { .. } => 1,
            FormatKind::AudioOnly { .. } => 2,
            FormatKind::FallbackProxy { .. } => 3,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            FormatKind::Combined { height, .. } | FormatKind::VideoOnly { height, .. } => *height,
            _ => 0,
        }
    }

    pub fn is_combined(&self) -> bool {
        matches!(self, FormatKind::Combined { .. })
    }
}

/// Source formats of a synthesized combined variant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourcePair {
    pub video: String,
    pub audio: String,
}

/// One deliverable rendition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatDescriptor {
    pub format_id: String,
    #[serde(flatten)]
    pub kind: FormatKind,
    /// Container extension
    pub container: Option<String>,
    /// Estimated size in bytes
    pub filesize: Option<u64>,
    pub quality_score: u32,
    pub delivery_url: String,
    /// Present when the variant stitches two separate tracks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<SourcePair>,
    /// Direct upstream URL, never exposed to clients
    #[serde(skip)]
    pub upstream_url: Option<String>,
    #[serde(skip)]
    bitrate: Option<f64>,
}

/// Quality score: height tier, frame rate and codec bonuses
pub fn quality_score(
    height: u32,
    fps: Option<f64>,
    vcodec: Option<&str>,
    acodec: Option<&str>,
) -> u32 {
    let mut score = match height {
        h if h >= 2160 => 1000,
        h if h >= 1440 => 800,
        h if h >= 1080 => 600,
        h if h >= 720 => 400,
        h if h >= 480 => 200,
        _ => 100,
    };

    match fps {
        Some(f) if f >= 60.0 => score += 100,
        Some(f) if f >= 30.0 => score += 50,
        _ => {}
    }

    if vcodec.is_some_and(|c| is_modern(c, MODERN_VIDEO_CODECS)) {
        score += 50;
    }
    if acodec.is_some_and(|c| is_modern(c, MODERN_AUDIO_CODECS)) {
        score += 25;
    }

    score
}

fn is_modern(codec: &str, families: &[&str]) -> bool {
    let codec = codec.to_ascii_lowercase();
    families.iter().any(|family| codec.starts_with(family))
}

/// Codec value if present and not the tool's `none` marker
fn real_codec(codec: &Option<String>) -> Option<&str> {
    codec
        .as_deref()
        .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("none"))
}

/// Builds URLs pointing back at this server
#[derive(Debug, Clone)]
pub struct DeliveryLinks {
    base_url: String,
    direct: bool,
}

impl DeliveryLinks {
    pub fn new(base_url: impl Into<String>, direct: bool) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            direct,
        }
    }

    fn video_base(&self, channel_id: &str, video_id: &str) -> String {
        format!(
            "{}/channels/{}/videos/{}",
            self.base_url,
            urlencoding::encode(channel_id),
            urlencoding::encode(video_id)
        )
    }

    /// Local stream URL for a concrete format
    pub fn format_url(&self, channel_id: &str, video_id: &str, format_id: &str) -> String {
        format!(
            "{}/stream?format={}",
            self.video_base(channel_id, video_id),
            urlencoding::encode(format_id)
        )
    }

    /// Local stream URL for a quality label
    pub fn quality_url(&self, channel_id: &str, video_id: &str, quality: &str) -> String {
        format!(
            "{}/stream?quality={}",
            self.video_base(channel_id, video_id),
            urlencoding::encode(quality)
        )
    }

    /// Local combination endpoint for a video/audio pair
    pub fn combine_url(&self, channel_id: &str, video_id: &str, pair: &SourcePair) -> String {
        format!(
            "{}/combine?video={}&audio={}",
            self.video_base(channel_id, video_id),
            urlencoding::encode(&pair.video),
            urlencoding::encode(&pair.audio)
        )
    }
}

/// Produces ranked descriptor lists
#[derive(Debug, Clone)]
pub struct FormatNormalizer {
    links: DeliveryLinks,
}

impl FormatNormalizer {
    pub fn new(links: DeliveryLinks) -> Self {
        Self { links }
    }

    /// Normalize raw format entries for one video.
    ///
    /// Never returns an empty list: without usable entries the generic
    /// `best`/`worst` fallbacks are returned.
    pub fn normalize(
        &self,
        raw: &[RawFormat],
        channel_id: &str,
        video_id: &str,
    ) -> Vec<FormatDescriptor> {
        let mut formats: Vec<FormatDescriptor> = raw
            .iter()
            .filter_map(|f| self.classify(f, channel_id, video_id))
            .collect();

        if formats.is_empty() {
            return self.fallback(channel_id, video_id);
        }

        rank(&mut formats);
        let mut formats = dedup(formats);

        if !formats.iter().any(|f| f.kind.is_combined()) {
            if let Some(combined) = self.synthesize_combined(&formats, channel_id, video_id) {
                formats.insert(0, combined);
            }
        }

        formats
    }

    /// Generic variants resolved lazily by the stream endpoint
    pub fn fallback(&self, channel_id: &str, video_id: &str) -> Vec<FormatDescriptor> {
        [FallbackLabel::Best, FallbackLabel::Worst]
            .into_iter()
            .map(|label| FormatDescriptor {
                format_id: label.as_str().to_string(),
                kind: FormatKind::FallbackProxy { label },
                container: None,
                filesize: None,
                quality_score: 0,
                delivery_url: self.links.quality_url(channel_id, video_id, label.as_str()),
                sources: None,
                upstream_url: None,
                bitrate: None,
            })
            .collect()
    }

    fn classify(&self, raw: &RawFormat, channel_id: &str, video_id: &str) -> Option<FormatDescriptor> {
        let url = raw.url.clone()?;
        let format_id = raw.format_id.clone()?;
        if let Some(protocol) = raw.protocol.as_deref() {
            if !PIPEABLE_PROTOCOLS.contains(&protocol) {
                return None;
            }
        }

        let vcodec = real_codec(&raw.vcodec);
        let acodec = real_codec(&raw.acodec);
        let height = raw.height.unwrap_or(0);
        let fps = raw.fps.filter(|f| *f > 0.0);

        let kind = match (vcodec, acodec) {
            (Some(v), Some(a)) => FormatKind::Combined {
                height,
                fps,
                vcodec: v.to_string(),
                acodec: a.to_string(),
            },
            (Some(v), None) => FormatKind::VideoOnly {
                height,
                fps,
                vcodec: v.to_string(),
            },
            (None, Some(a)) => FormatKind::AudioOnly {
                acodec: a.to_string(),
                bitrate: raw.abr.or(raw.tbr),
            },
            // storyboards and other non-media entries
            (None, None) => return None,
        };

        let quality_score = match &kind {
            FormatKind::AudioOnly { .. } => quality_score(0, None, None, acodec),
            _ => quality_score(height, fps, vcodec, acodec),
        };

        let delivery_url = if self.links.direct {
            url.clone()
        } else {
            self.links.format_url(channel_id, video_id, &format_id)
        };

        Some(FormatDescriptor {
            format_id,
            kind,
            container: raw.ext.clone(),
            filesize: raw.filesize.or(raw.filesize_approx),
            quality_score,
            delivery_url,
            sources: None,
            upstream_url: Some(url),
            bitrate: raw.tbr.or(raw.abr),
        })
    }

    fn synthesize_combined(
        &self,
        formats: &[FormatDescriptor],
        channel_id: &str,
        video_id: &str,
    ) -> Option<FormatDescriptor> {
        let video = formats
            .iter()
            .find(|f| matches!(f.kind, FormatKind::VideoOnly { .. }))?;
        let audio = formats
            .iter()
            .find(|f| matches!(f.kind, FormatKind::AudioOnly { .. }))?;

        let (FormatKind::VideoOnly { height, fps, vcodec }, FormatKind::AudioOnly { acodec, .. }) =
            (&video.kind, &audio.kind)
        else {
            return None;
        };

        let sources = SourcePair {
            video: video.format_id.clone(),
            audio: audio.format_id.clone(),
        };
        let filesize = match (video.filesize, audio.filesize) {
            (Some(v), Some(a)) => Some(v + a),
            _ => None,
        };

        Some(FormatDescriptor {
            format_id: format!("{}+{}", sources.video, sources.audio),
            kind: FormatKind::Combined {
                height: *height,
                fps: *fps,
                vcodec: vcodec.clone(),
                acodec: acodec.clone(),
            },
            container: video.container.clone(),
            filesize,
            quality_score: quality_score(*height, *fps, Some(vcodec), Some(acodec)),
            delivery_url: self.links.combine_url(channel_id, video_id, &sources),
            sources: Some(sources),
            upstream_url: None,
            bitrate: None,
        })
    }
}

/// Order by kind priority, then score, then height, then bitrate
fn rank(formats: &mut [FormatDescriptor]) {
    formats.sort_by(|a, b| {
        a.kind
            .priority()
            .cmp(&b.kind.priority())
            .then(b.quality_score.cmp(&a.quality_score))
            .then(b.kind.height().cmp(&a.kind.height()))
            .then(
                b.bitrate
                    .unwrap_or(0.0)
                    .total_cmp(&a.bitrate.unwrap_or(0.0)),
            )
    });
}

/// Keep the best-ranked entry of each distinct rendition
fn dedup(formats: Vec<FormatDescriptor>) -> Vec<FormatDescriptor> {
    let mut seen_ids = HashSet::new();
    let mut seen_renditions = HashSet::new();

    formats
        .into_iter()
        .filter(|f| {
            let rendition = match &f.kind {
                FormatKind::Combined { height, fps, .. } | FormatKind::VideoOnly { height, fps, .. } => {
                    format!(
                        "{}:{}:{}:{}",
                        f.kind.priority(),
                        height,
                        fps.unwrap_or(0.0).round(),
                        f.container.as_deref().unwrap_or("")
                    )
                }
                FormatKind::AudioOnly { acodec, .. } => {
                    let family = acodec.split('.').next().unwrap_or(acodec);
                    format!("audio:{}:{}", family, f.container.as_deref().unwrap_or(""))
                }
                FormatKind::FallbackProxy { label } => format!("fallback:{}", label.as_str()),
            };
            seen_ids.insert(f.format_id.clone()) && seen_renditions.insert(rendition)
        })
        .collect()
}
