//! Extraction tool records
//!
//! `RawVideo`/`RawFormat` mirror the loose JSON the tool prints; they are
//! converted once into `VideoRecord` at the parsing boundary.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normalized metadata for one media item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoRecord {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    /// Duration in seconds
    pub duration: Option<u64>,
    pub thumbnail: Option<String>,
    /// Channel / author name
    pub channel: Option<String>,
    pub channel_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub comment_count: Option<u64>,
    pub tags: Vec<String>,
    pub adult: bool,
    pub webpage_url: Option<String>,
    pub subtitles: Vec<SubtitleTrack>,
}

/// One subtitle rendition advertised by the tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubtitleTrack {
    pub language: String,
    pub ext: String,
    pub url: String,
    /// Machine-generated captions
    pub automatic: bool,
}

impl VideoRecord {
    /// Best subtitle track for a language: manual before automatic,
    /// `vtt` before other formats. `en` also matches `en-US`.
    pub fn subtitle_for(&self, language: &str) -> Option<&SubtitleTrack> {
        let wanted = language.to_lowercase();
        self.subtitles
            .iter()
            .filter(|t| {
                let lang = t.language.to_lowercase();
                lang == wanted || lang.starts_with(&format!("{}-", wanted))
            })
            .min_by_key(|t| (t.automatic, t.ext != "vtt", t.language.len()))
    }
}

/// One format entry of the tool's JSON output
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    pub format_id: Option<String>,
    pub url: Option<String>,
    pub ext: Option<String>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<u64>,
    /// Total bitrate in kbit/s
    pub tbr: Option<f64>,
    pub abr: Option<f64>,
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawThumbnail {
    pub url: Option<String>,
    pub preference: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSubtitle {
    pub ext: Option<String>,
    pub url: Option<String>,
}

/// One JSON record printed by the tool (full dump or flat playlist entry)
#[derive(Debug, Clone, Deserialize)]
pub struct RawVideo {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub thumbnails: Vec<RawThumbnail>,
    pub channel: Option<String>,
    pub uploader: Option<String>,
    pub channel_url: Option<String>,
    pub uploader_url: Option<String>,
    pub timestamp: Option<i64>,
    pub upload_date: Option<String>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub comment_count: Option<u64>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    pub age_limit: Option<u32>,
    pub webpage_url: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub formats: Option<Vec<RawFormat>>,
    #[serde(default)]
    pub subtitles: Option<BTreeMap<String, Vec<RawSubtitle>>>,
    #[serde(default)]
    pub automatic_captions: Option<BTreeMap<String, Vec<RawSubtitle>>>,
}

/// Age limit at or above which content is flagged adult
const ADULT_AGE_LIMIT: u32 = 18;

impl RawVideo {
    fn thumbnail_url(&self) -> Option<String> {
        if let Some(url) = &self.thumbnail {
            return Some(url.clone());
        }
        // Flat entries only carry a thumbnail list; the tool orders it
        // worst to best unless preferences say otherwise.
        self.thumbnails
            .iter()
            .enumerate()
            .filter(|(_, t)| t.url.is_some())
            .max_by_key(|(i, t)| (t.preference.unwrap_or(0), *i))
            .and_then(|(_, t)| t.url.clone())
    }

    fn published_at(&self) -> Option<DateTime<Utc>> {
        if let Some(ts) = self.timestamp {
            return DateTime::from_timestamp(ts, 0);
        }
        let date = NaiveDate::parse_from_str(self.upload_date.as_deref()?, "%Y%m%d").ok()?;
        date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc())
    }

    fn subtitle_tracks(&self) -> Vec<SubtitleTrack> {
        let mut tracks = Vec::new();
        let sources = [(&self.subtitles, false), (&self.automatic_captions, true)];
        for (source, automatic) in sources {
            let Some(map) = source else { continue };
            for (language, entries) in map {
                for entry in entries {
                    if let (Some(url), Some(ext)) = (&entry.url, &entry.ext) {
                        tracks.push(SubtitleTrack {
                            language: language.clone(),
                            ext: ext.clone(),
                            url: url.clone(),
                            automatic,
                        });
                    }
                }
            }
        }
        tracks
    }

    /// Convert into the normalized record
    pub fn to_record(&self) -> VideoRecord {
        VideoRecord {
            id: self.id.clone(),
            title: self.title.clone().unwrap_or_else(|| self.id.clone()),
            description: self.description.clone(),
            duration: self.duration.filter(|d| *d >= 0.0).map(|d| d.round() as u64),
            thumbnail: self.thumbnail_url(),
            channel: self.channel.clone().or_else(|| self.uploader.clone()),
            channel_url: self.channel_url.clone().or_else(|| self.uploader_url.clone()),
            published_at: self.published_at(),
            view_count: self.view_count,
            like_count: self.like_count,
            comment_count: self.comment_count,
            tags: self.tags.clone().unwrap_or_default(),
            adult: self.age_limit.unwrap_or(0) >= ADULT_AGE_LIMIT,
            webpage_url: self.webpage_url.clone().or_else(|| self.url.clone()),
            subtitles: self.subtitle_tracks(),
        }
    }
}
