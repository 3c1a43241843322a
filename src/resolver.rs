//! Resolution operations
//!
//! Search, metadata, format lists, channel listings and direct URLs. Every
//! operation checks its own cache before invoking the extraction tool.
//! Extraction failures never escape as panics: list operations degrade to
//! an empty page and format lookups to the generic fallbacks, each with
//! the error attached.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{make_key, CacheStats, ResultCache};
use crate::config::{CachesConfig, ChannelProfile, ExtractorConfig};
use crate::error::ExtractError;
use crate::extract::parser::{parse_json_lines, parse_single, parse_urls};
use crate::extract::{ArgsBuilder, Extractor, FormatSelector, SearchFilters, VideoRecord};
use crate::formats::{FormatDescriptor, FormatNormalizer};
use crate::usage::UsageTracker;

/// Default page size
pub const DEFAULT_LIMIT: usize = 20;

/// Largest page a caller may request
pub const MAX_LIMIT: usize = 100;

/// One page of a video list
#[derive(Debug, Clone, Serialize)]
pub struct VideoPage {
    pub videos: Vec<VideoRecord>,
    pub has_more: bool,
    pub total: usize,
    pub skip: usize,
    pub limit: usize,
    /// Set when the list is empty because resolution failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VideoPage {
    fn failed(skip: usize, limit: usize, err: &ExtractError) -> Self {
        Self {
            videos: Vec::new(),
            has_more: false,
            total: 0,
            skip,
            limit,
            error: Some(err.to_string()),
        }
    }
}

/// Slice `videos[skip..skip + limit]`
pub fn paginate(videos: &[VideoRecord], skip: usize, limit: usize) -> VideoPage {
    let total = videos.len();
    let start = skip.min(total);
    let end = skip.saturating_add(limit).min(total);
    VideoPage {
        videos: videos[start..end].to_vec(),
        has_more: total > skip.saturating_add(limit),
        total,
        skip,
        limit,
        error: None,
    }
}

/// Ranked formats of one video
#[derive(Debug, Clone, Serialize)]
pub struct FormatList {
    pub video_id: String,
    pub formats: Vec<FormatDescriptor>,
    /// Set when `formats` holds the generic fallbacks because resolution failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A fetched list together with how many records were asked for
#[derive(Debug, Clone)]
struct FetchedList {
    videos: Vec<VideoRecord>,
    requested: usize,
}

impl FetchedList {
    /// Whether this list can answer a request needing `needed` records
    fn covers(&self, needed: usize) -> bool {
        self.requested >= needed || self.videos.len() < self.requested
    }
}

#[derive(Serialize)]
struct SearchParams<'a> {
    channel: &'a str,
    query: &'a str,
    filters: &'a SearchFilters,
}

#[derive(Serialize)]
struct VideoParams<'a> {
    channel: &'a str,
    video_id: &'a str,
}

#[derive(Serialize)]
struct ListingParams<'a> {
    channel: &'a str,
    url: &'a str,
}

#[derive(Serialize)]
struct UrlParams<'a> {
    channel: &'a str,
    video_id: &'a str,
    selector: &'a FormatSelector,
}

struct Timeouts {
    metadata: Duration,
    search: Duration,
    listing: Duration,
    url: Duration,
}

impl From<&ExtractorConfig> for Timeouts {
    fn from(config: &ExtractorConfig) -> Self {
        Self {
            metadata: Duration::from_secs(config.metadata_timeout_secs),
            search: Duration::from_secs(config.search_timeout_secs),
            listing: Duration::from_secs(config.listing_timeout_secs),
            url: Duration::from_secs(config.url_timeout_secs),
        }
    }
}

/// Cached resolution front-end to the extraction tool
pub struct Resolver {
    extractor: Arc<dyn Extractor>,
    args: ArgsBuilder,
    normalizer: FormatNormalizer,
    usage: Arc<UsageTracker>,
    timeouts: Timeouts,
    search_cache: ResultCache<FetchedList>,
    metadata_cache: ResultCache<VideoRecord>,
    formats_cache: ResultCache<Vec<FormatDescriptor>>,
    listing_cache: ResultCache<FetchedList>,
    url_cache: ResultCache<Vec<String>>,
}

impl Resolver {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        extractor_config: &ExtractorConfig,
        caches: &CachesConfig,
        normalizer: FormatNormalizer,
        usage: Arc<UsageTracker>,
    ) -> Self {
        Self {
            extractor,
            args: ArgsBuilder::new(extractor_config.extra_args.clone()),
            normalizer,
            usage,
            timeouts: Timeouts::from(extractor_config),
            search_cache: ResultCache::new("search", &caches.search),
            metadata_cache: ResultCache::new("metadata", &caches.metadata),
            formats_cache: ResultCache::new("formats", &caches.formats),
            listing_cache: ResultCache::new("listings", &caches.listings),
            url_cache: ResultCache::new("urls", &caches.urls),
        }
    }

    pub fn extractor(&self) -> &Arc<dyn Extractor> {
        &self.extractor
    }

    /// Search a channel, returning one page of results
    pub async fn search(
        &self,
        channel: &ChannelProfile,
        query: &str,
        filters: &SearchFilters,
        skip: usize,
        limit: usize,
    ) -> VideoPage {
        self.usage.record(
            &channel.id,
            "search",
            json!({ "query": query, "filters": filters, "skip": skip, "limit": limit }),
        );

        let needed = skip.saturating_add(limit).saturating_add(1);
        let key = make_key(
            "search",
            &SearchParams {
                channel: &channel.id,
                query,
                filters,
            },
        );

        if let Some(list) = self.search_cache.get(&key).filter(|l| l.covers(needed)) {
            debug!("Search cache hit for {:?}", query);
            return paginate(&list.videos, skip, limit);
        }

        let args = self.args.search(channel, query, needed, filters);
        match self.run_list(args, self.timeouts.search).await {
            Ok(videos) => {
                let page = paginate(&videos, skip, limit);
                self.search_cache.put(key, FetchedList { videos, requested: needed });
                page
            }
            Err(e) => {
                warn!("Search {:?} on {} failed: {}", query, channel.id, e);
                VideoPage::failed(skip, limit, &e)
            }
        }
    }

    /// Uploads of a channel page
    pub async fn get_channel_videos(
        &self,
        channel: &ChannelProfile,
        url: &str,
        skip: usize,
        limit: usize,
    ) -> VideoPage {
        self.usage.record(
            &channel.id,
            "listing",
            json!({ "url": url, "skip": skip, "limit": limit }),
        );

        let needed = skip.saturating_add(limit).saturating_add(1);
        let key = make_key(
            "listing",
            &ListingParams {
                channel: &channel.id,
                url,
            },
        );

        if let Some(list) = self.listing_cache.get(&key).filter(|l| l.covers(needed)) {
            debug!("Listing cache hit for {}", url);
            return paginate(&list.videos, skip, limit);
        }

        let args = self.args.channel_listing(url, needed);
        match self.run_list(args, self.timeouts.listing).await {
            Ok(videos) => {
                let page = paginate(&videos, skip, limit);
                self.listing_cache.put(key, FetchedList { videos, requested: needed });
                page
            }
            Err(e) => {
                warn!("Listing {} on {} failed: {}", url, channel.id, e);
                VideoPage::failed(skip, limit, &e)
            }
        }
    }

    /// Metadata of one video
    pub async fn get_info(
        &self,
        channel: &ChannelProfile,
        video_id: &str,
    ) -> Result<VideoRecord, ExtractError> {
        self.usage
            .record(&channel.id, "info", json!({ "video_id": video_id }));

        let key = video_key("info", channel, video_id);
        if let Some(record) = self.metadata_cache.get(&key) {
            debug!("Metadata cache hit for {}", video_id);
            return Ok(record);
        }

        let (record, _) = self.fetch_video(channel, video_id).await?;
        Ok(record)
    }

    /// Ranked formats of one video; never empty
    pub async fn get_formats(&self, channel: &ChannelProfile, video_id: &str) -> FormatList {
        self.usage
            .record(&channel.id, "formats", json!({ "video_id": video_id }));

        let key = video_key("formats", channel, video_id);
        if let Some(formats) = self.formats_cache.get(&key) {
            debug!("Formats cache hit for {}", video_id);
            return FormatList {
                video_id: video_id.to_string(),
                formats,
                error: None,
            };
        }

        match self.fetch_video(channel, video_id).await {
            Ok((_, formats)) => FormatList {
                video_id: video_id.to_string(),
                formats,
                error: None,
            },
            Err(e) => {
                warn!("Formats for {} unavailable, using fallbacks: {}", video_id, e);
                FormatList {
                    video_id: video_id.to_string(),
                    formats: self.normalizer.fallback(&channel.id, video_id),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Direct upstream URLs for a selector, one per track
    pub async fn resolve_url(
        &self,
        channel: &ChannelProfile,
        video_id: &str,
        selector: &FormatSelector,
    ) -> Result<Vec<String>, ExtractError> {
        self.usage.record(
            &channel.id,
            "resolve_url",
            json!({ "video_id": video_id, "selector": selector.to_string() }),
        );

        let key = make_key(
            "url",
            &UrlParams {
                channel: &channel.id,
                video_id,
                selector,
            },
        );
        if let Some(urls) = self.url_cache.get(&key) {
            debug!("URL cache hit for {} ({})", video_id, selector);
            return Ok(urls);
        }

        let args = self.args.direct_url(channel, video_id, selector);
        let output = self.extractor.run(args, self.timeouts.url).await?;
        let urls = parse_urls(&output);
        if urls.is_empty() {
            return Err(ExtractError::EmptyOutput);
        }

        self.url_cache.put(key, urls.clone());
        Ok(urls)
    }

    /// One full dump feeds both the metadata and the formats cache
    async fn fetch_video(
        &self,
        channel: &ChannelProfile,
        video_id: &str,
    ) -> Result<(VideoRecord, Vec<FormatDescriptor>), ExtractError> {
        let args = self.args.video_info(channel, video_id);
        let output = self.extractor.run(args, self.timeouts.metadata).await?;
        let raw = parse_single(&output)?;

        let record = raw.to_record();
        let formats = self.normalizer.normalize(
            raw.formats.as_deref().unwrap_or_default(),
            &channel.id,
            video_id,
        );

        self.metadata_cache
            .put(video_key("info", channel, video_id), record.clone());
        self.formats_cache
            .put(video_key("formats", channel, video_id), formats.clone());

        Ok((record, formats))
    }

    async fn run_list(
        &self,
        args: Vec<String>,
        timeout: Duration,
    ) -> Result<Vec<VideoRecord>, ExtractError> {
        let output = self.extractor.run(args, timeout).await?;
        let batch = parse_json_lines(&output);
        if !batch.warnings.is_empty() {
            warn!("{} record(s) skipped in tool output", batch.warnings.len());
        }
        Ok(batch.videos.iter().map(|raw| raw.to_record()).collect())
    }

    /// Drop expired entries from every cache
    pub fn sweep(&self) -> usize {
        self.search_cache.sweep()
            + self.metadata_cache.sweep()
            + self.formats_cache.sweep()
            + self.listing_cache.sweep()
            + self.url_cache.sweep()
    }

    pub fn clear(&self) {
        self.search_cache.clear();
        self.metadata_cache.clear();
        self.formats_cache.clear();
        self.listing_cache.clear();
        self.url_cache.clear();
    }

    pub fn cache_stats(&self) -> Vec<CacheStats> {
        vec![
            self.search_cache.stats(),
            self.metadata_cache.stats(),
            self.formats_cache.stats(),
            self.listing_cache.stats(),
            self.url_cache.stats(),
        ]
    }
}

fn video_key(operation: &str, channel: &ChannelProfile, video_id: &str) -> String {
    make_key(
        operation,
        &VideoParams {
            channel: &channel.id,
            video_id,
        },
    )
}
