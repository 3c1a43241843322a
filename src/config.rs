//! Server configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Size and lifetime of one result cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries
    pub capacity: usize,

    /// Time-to-live for entries in seconds
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn new(capacity: usize, ttl_secs: u64) -> Self {
        Self { capacity, ttl_secs }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// One cache per operation type, so pressure on one never starves another
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachesConfig {
    pub search: CacheConfig,
    pub metadata: CacheConfig,
    pub formats: CacheConfig,
    pub listings: CacheConfig,
    pub urls: CacheConfig,

    /// Interval between sweeps of expired entries, in seconds
    pub sweep_interval_secs: u64,
}

impl Default for CachesConfig {
    fn default() -> Self {
        Self {
            search: CacheConfig::new(100, 300),     // 5 minutes
            metadata: CacheConfig::new(500, 3600),  // 1 hour
            formats: CacheConfig::new(200, 1800),   // 30 minutes
            listings: CacheConfig::new(50, 600),    // 10 minutes
            urls: CacheConfig::new(200, 1800),      // direct URLs expire upstream
            sweep_interval_secs: 60,
        }
    }
}

/// External extraction tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Executable name or path
    pub program: String,

    /// Extra arguments appended to every invocation (cookies, proxies, ...)
    pub extra_args: Vec<String>,

    pub metadata_timeout_secs: u64,
    pub search_timeout_secs: u64,
    pub listing_timeout_secs: u64,
    pub url_timeout_secs: u64,

    /// Deepest result a search or listing page may reach (`skip + limit`)
    pub max_results: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            extra_args: Vec::new(),
            metadata_timeout_secs: 30,
            search_timeout_secs: 45,
            listing_timeout_secs: 90,
            url_timeout_secs: 30,
            max_results: 500,
        }
    }
}

/// Stream delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Maximum concurrent deliveries
    pub max_concurrent: usize,

    /// Upstream safety timeout in seconds
    pub timeout_secs: u64,

    /// Advertise upstream URLs directly instead of local proxy URLs
    pub direct_urls: bool,

    /// Number of chunks buffered between the upstream reader and the client
    pub channel_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            timeout_secs: 30,
            direct_urls: false,
            channel_buffer: 16,
        }
    }
}

impl StreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A content channel (plugin) served through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelProfile {
    /// Identifier used in request paths
    pub id: String,

    /// Human readable name
    pub name: String,

    /// Page URL for a video, `{id}` is replaced by the video id
    pub video_url_template: String,

    /// Search selector prefix understood by the tool, e.g. `ytsearch`
    pub search_prefix: String,

    /// Search selector prefix that sorts by upload date
    pub date_search_prefix: String,
}

impl ChannelProfile {
    pub fn youtube() -> Self {
        Self {
            id: "youtube".to_string(),
            name: "YouTube".to_string(),
            video_url_template: "https://www.youtube.com/watch?v={id}".to_string(),
            search_prefix: "ytsearch".to_string(),
            date_search_prefix: "ytsearchdate".to_string(),
        }
    }

    /// Page URL for a video id
    pub fn video_url(&self, video_id: &str) -> String {
        self.video_url_template
            .replace("{id}", &urlencoding::encode(video_id))
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Externally visible base URL used in local delivery URLs
    pub public_url: Option<String>,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log output format (pretty, json)
    pub log_format: String,

    /// Result caches
    pub caches: CachesConfig,

    /// Extraction tool
    pub extractor: ExtractorConfig,

    /// Delivery
    pub stream: StreamConfig,

    /// Usage records kept per channel
    pub usage_history: usize,

    /// Configured channels
    pub channels: Vec<ChannelProfile>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            public_url: None,
            cors_enabled: true,
            log_level: "debug".to_string(),
            log_format: "pretty".to_string(),
            caches: CachesConfig::default(),
            extractor: ExtractorConfig::default(),
            stream: StreamConfig::default(),
            usage_history: 100,
            channels: vec![ChannelProfile::youtube()],
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL for links pointing back at this server
    pub fn base_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let host = if self.host == "0.0.0.0" {
                    "127.0.0.1"
                } else {
                    self.host.as_str()
                };
                format!("http://{}:{}", host, self.port)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.stream.max_concurrent, 10);
        assert_eq!(config.stream.timeout_secs, 30);
        assert_eq!(config.usage_history, 100);
        assert_eq!(config.channels.len(), 1);
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(config.socket_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_base_url() {
        let config = ServerConfig::default();
        assert_eq!(config.base_url(), "http://127.0.0.1:3000");

        let config = ServerConfig {
            public_url: Some("https://relay.example.com/".to_string()),
            ..Default::default()
        };
        assert_eq!(config.base_url(), "https://relay.example.com");
    }

    #[test]
    fn test_channel_video_url() {
        let channel = ChannelProfile::youtube();
        assert_eq!(
            channel.video_url("dQw4w9WgXcQ"),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
    }

    #[test]
    fn test_video_url_encodes_id() {
        let channel = ChannelProfile::youtube();
        assert_eq!(
            channel.video_url("abc&list=PL1"),
            "https://www.youtube.com/watch?v=abc%26list%3DPL1"
        );
    }
}
