//! Test fixtures
//!
//! A scripted extraction tool and canned tool output, so resolution and
//! delivery can be exercised without the real executable.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::ExtractError;
use crate::extract::{Extractor, RawFormat};

type Script = Box<dyn Fn(&[String]) -> Result<String, ExtractError> + Send + Sync>;

/// Extractor double that answers from a closure and counts invocations
pub struct ScriptedExtractor {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new(script: impl Fn(&[String]) -> Result<String, ExtractError> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always print `output`
    pub fn ok(output: String) -> Self {
        Self::new(move |_| Ok(output.clone()))
    }

    /// Always fail with `err`
    pub fn err(err: ExtractError) -> Self {
        Self::new(move |_| Err(err.clone()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn run(&self, args: Vec<String>, _timeout: Duration) -> Result<String, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(&args)
    }

    fn is_available(&self) -> bool {
        true
    }

    fn version(&self) -> Option<String> {
        Some("scripted".to_string())
    }

    fn program(&self) -> &str {
        "scripted"
    }
}

/// Flat search output with ids `v0..v{n-1}`
pub fn search_output(n: usize) -> String {
    (0..n)
        .map(|i| {
            json!({
                "id": format!("v{i}"),
                "title": format!("video {i}"),
                "duration": 60 + i,
                "url": format!("https://www.youtube.com/watch?v=v{i}"),
            })
            .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_json(id: &str, base_url: &str, height: Option<u32>, vcodec: &str, acodec: &str, ext: &str) -> serde_json::Value {
    json!({
        "format_id": id,
        "url": format!("{base_url}/media/{id}.{ext}"),
        "ext": ext,
        "height": height,
        "fps": height.map(|_| 30),
        "vcodec": vcodec,
        "acodec": acodec,
        "protocol": "https",
        "tbr": 500.0,
    })
}

fn formats_json(base_url: &str) -> Vec<serde_json::Value> {
    vec![
        format_json("18", base_url, Some(360), "avc1.42001E", "mp4a.40.2", "mp4"),
        format_json("22", base_url, Some(720), "avc1.64001F", "mp4a.40.2", "mp4"),
        format_json("137", base_url, Some(1080), "avc1.640028", "none", "mp4"),
        format_json("140", base_url, None, "none", "mp4a.40.2", "m4a"),
    ]
}

/// Two combined, one video-only and one audio-only format under `base_url`
pub fn raw_formats(base_url: &str) -> Vec<RawFormat> {
    formats_json(base_url)
        .into_iter()
        .filter_map(|f| serde_json::from_value(f).ok())
        .collect()
}

/// Full single-video dump whose media, thumbnail and subtitle URLs live under `base_url`
pub fn video_dump(id: &str, base_url: &str) -> String {
    json!({
        "id": id,
        "title": format!("Video {id}"),
        "description": "fixture",
        "duration": 125.0,
        "thumbnail": format!("{base_url}/thumb/{id}.jpg"),
        "channel": "Fixture Channel",
        "timestamp": 1_700_000_000,
        "view_count": 42,
        "tags": ["test"],
        "webpage_url": format!("https://www.youtube.com/watch?v={id}"),
        "formats": formats_json(base_url),
        "subtitles": {
            "en": [{ "ext": "vtt", "url": format!("{base_url}/subs/{id}.en.vtt") }]
        },
    })
    .to_string()
}

/// Dump with only separate video and audio tracks
pub fn split_track_dump(id: &str, base_url: &str) -> String {
    json!({
        "id": id,
        "title": format!("Video {id}"),
        "formats": [
            format_json("137", base_url, Some(1080), "avc1.640028", "none", "mp4"),
            format_json("140", base_url, None, "none", "mp4a.40.2", "m4a"),
        ],
    })
    .to_string()
}
