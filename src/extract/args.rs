//! Extraction tool argument lists
//!
//! Builders for every invocation mode: search, single-video dump, channel
//! listing, and direct URL resolution with a format selector.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ChannelProfile;

/// Search ordering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    #[default]
    Relevance,
    Date,
}

/// Upload date window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateFilter {
    Hour,
    Today,
    Week,
    Month,
    Year,
}

impl DateFilter {
    /// Relative date understood by `--dateafter`
    fn date_after(self) -> &'static str {
        match self {
            // the tool's date filter has day granularity
            DateFilter::Hour | DateFilter::Today => "now-1day",
            DateFilter::Week => "now-1week",
            DateFilter::Month => "now-1month",
            DateFilter::Year => "now-1year",
        }
    }
}

/// Duration bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationFilter {
    /// Under 4 minutes
    Short,
    /// 4 to 20 minutes
    Medium,
    /// Over 20 minutes
    Long,
}

impl DurationFilter {
    fn match_filter(self) -> &'static str {
        match self {
            DurationFilter::Short => "duration < 240",
            DurationFilter::Medium => "duration >= 240 & duration <= 1200",
            DurationFilter::Long => "duration > 1200",
        }
    }
}

/// Search parameters that change the tool invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub search_type: SearchType,
    pub date: Option<DateFilter>,
    pub duration: Option<DurationFilter>,
}

/// Format selector expression passed with `-f`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FormatSelector {
    Best,
    Worst,
    /// Best audio-only file
    BestAudio,
    /// Best single file not taller than the bound
    MaxHeight(u32),
    /// A specific format id
    Id(String),
    /// Separate video and audio formats
    Pair { video: String, audio: String },
}

impl fmt::Display for FormatSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatSelector::Best => write!(f, "best"),
            FormatSelector::Worst => write!(f, "worst"),
            FormatSelector::BestAudio => write!(f, "bestaudio"),
            FormatSelector::MaxHeight(h) => write!(f, "best[height<={h}]/best"),
            FormatSelector::Id(id) => write!(f, "{id}"),
            FormatSelector::Pair { video, audio } => write!(f, "{video}+{audio}"),
        }
    }
}

/// Builds argument lists, appending configured extra args to each
#[derive(Debug, Clone, Default)]
pub struct ArgsBuilder {
    extra_args: Vec<String>,
}

impl ArgsBuilder {
    pub fn new(extra_args: Vec<String>) -> Self {
        Self { extra_args }
    }

    fn finish(&self, mut args: Vec<String>, target: String) -> Vec<String> {
        args.push("--no-warnings".to_string());
        args.extend(self.extra_args.iter().cloned());
        args.push(target);
        args
    }

    /// Search returning `count` flat JSON records
    pub fn search(
        &self,
        channel: &ChannelProfile,
        query: &str,
        count: usize,
        filters: &SearchFilters,
    ) -> Vec<String> {
        let prefix = match filters.search_type {
            SearchType::Relevance => &channel.search_prefix,
            SearchType::Date => &channel.date_search_prefix,
        };

        let mut args = vec!["--dump-json".to_string(), "--flat-playlist".to_string()];
        if let Some(date) = filters.date {
            args.push("--dateafter".to_string());
            args.push(date.date_after().to_string());
        }
        if let Some(duration) = filters.duration {
            args.push("--match-filter".to_string());
            args.push(duration.match_filter().to_string());
        }

        self.finish(args, format!("{}{}:{}", prefix, count, query))
    }

    /// Full JSON dump of one video, formats included
    pub fn video_info(&self, channel: &ChannelProfile, video_id: &str) -> Vec<String> {
        let args = vec!["--dump-json".to_string(), "--no-playlist".to_string()];
        self.finish(args, channel.video_url(video_id))
    }

    /// Flat listing of the first `count` uploads of a channel page
    pub fn channel_listing(&self, channel_url: &str, count: usize) -> Vec<String> {
        let args = vec![
            "--dump-json".to_string(),
            "--flat-playlist".to_string(),
            "--playlist-end".to_string(),
            count.to_string(),
        ];
        self.finish(args, channel_url.to_string())
    }

    /// Direct media URL(s) for a selector, one per output line
    pub fn direct_url(
        &self,
        channel: &ChannelProfile,
        video_id: &str,
        selector: &FormatSelector,
    ) -> Vec<String> {
        let args = vec![
            "-f".to_string(),
            selector.to_string(),
            "--get-url".to_string(),
            "--no-playlist".to_string(),
        ];
        self.finish(args, channel.video_url(video_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_args() {
        let builder = ArgsBuilder::new(vec!["--cookies".into(), "c.txt".into()]);
        let filters = SearchFilters {
            search_type: SearchType::Date,
            date: Some(DateFilter::Week),
            duration: Some(DurationFilter::Short),
        };
        let args = builder.search(&ChannelProfile::youtube(), "rust talks", 11, &filters);

        assert_eq!(
            args,
            vec![
                "--dump-json",
                "--flat-playlist",
                "--dateafter",
                "now-1week",
                "--match-filter",
                "duration < 240",
                "--no-warnings",
                "--cookies",
                "c.txt",
                "ytsearchdate11:rust talks",
            ]
        );
    }

    #[test]
    fn test_direct_url_args() {
        let args = ArgsBuilder::default().direct_url(
            &ChannelProfile::youtube(),
            "abc",
            &FormatSelector::MaxHeight(720),
        );
        assert_eq!(args[0], "-f");
        assert_eq!(args[1], "best[height<=720]/best");
        assert_eq!(args.last().map(String::as_str), Some("https://www.youtube.com/watch?v=abc"));
    }

    #[test]
    fn test_selector_display() {
        let pair = FormatSelector::Pair {
            video: "137".into(),
            audio: "140".into(),
        };
        assert_eq!(pair.to_string(), "137+140");
        assert_eq!(FormatSelector::Worst.to_string(), "worst");
        assert_eq!(FormatSelector::BestAudio.to_string(), "bestaudio");
    }

    #[test]
    fn test_listing_args() {
        let args = ArgsBuilder::default().channel_listing("https://www.youtube.com/@rust/videos", 31);
        assert!(args.windows(2).any(|w| w == ["--playlist-end", "31"]));
    }
}
